pub mod annotate;
pub mod cli;
pub mod error;
pub mod merge;
pub mod model;
pub mod parsers;
pub mod report;
pub mod resolve;
pub mod tree;
