pub mod run;
pub mod summarize;
pub mod tools;
