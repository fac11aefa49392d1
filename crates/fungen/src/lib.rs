pub mod backend;
pub mod cli;
pub mod edit;
pub mod processor;
pub mod settings;
pub mod stage;
pub mod timeline;
pub mod tracker;
