pub mod hint;
pub mod num;
pub mod print;
pub mod time;
