pub mod contents;
pub mod scenes;
pub mod sections;
