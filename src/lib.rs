pub mod artifact;
pub mod backend;
pub mod characters;
pub mod config;
pub mod error;
pub mod extract;
pub mod glossary;
pub mod ir;
pub mod markup;
pub mod merge;
pub mod pipeline;
pub mod progress;
pub mod script;
pub mod textutil;
