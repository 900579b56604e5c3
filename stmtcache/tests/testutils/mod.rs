//! Test utilities for statement cache integration tests
//!
//! - TestStatement: compiled statement with an adjustable size
//! - CountingChecker: access checker that records calls and denies chosen roles
//! - CacheFixture: a cache on a private lock manager, plus helpers for peers

pub mod test_fixture;
