// src/lib.rs
pub mod config;
pub mod error;

pub mod data {
    pub mod infile;
    pub mod members;
    pub mod reader;
    pub mod registry;
}

pub mod derive {
    pub mod backend;
    pub mod command;
}

pub mod session {
    pub mod prepare;
    pub mod probability;
    pub mod state;
    pub mod subsetting;
}
