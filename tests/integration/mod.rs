//! Integration tests for the scaffold generation pipeline

mod coordinator;
mod directory_backend;
mod lifecycle;
