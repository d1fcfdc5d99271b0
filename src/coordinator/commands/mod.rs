pub mod identify;
pub mod poll;
