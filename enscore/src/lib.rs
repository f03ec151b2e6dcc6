// error module
pub mod error;

// grid module
pub mod grid {
    pub mod field;
    pub mod mask;
}

// algorithm module
pub mod algorithm {
    pub mod subset;
}

// run module
pub mod run {
    pub mod descriptor;
    pub mod method;
    pub mod paths;
    pub mod response;
    pub mod time;
}
