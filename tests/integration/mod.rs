//! Integration tests for the arbor file-tree tracker

mod service_ordering;
mod support;
mod tracker_properties;
mod walker_thread;
