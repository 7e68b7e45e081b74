//! Container stack control

pub mod controller;
