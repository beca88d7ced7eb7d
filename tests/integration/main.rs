// Integration tests for fieldencryption

mod common;

mod concurrency_test;
mod persistence_test;
