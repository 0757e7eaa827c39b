//! Property-based tests for tower-balancer.
//!
//! Run with: cargo test --test property_tests
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for the pool and the dispatch path.

pub mod pool;
