//! Status API

pub mod rest;
