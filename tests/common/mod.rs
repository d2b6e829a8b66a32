#![allow(dead_code)]

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod node;

pub(crate) mod records;

pub(crate) mod weight_file;
