//! Property-based tests for normalization, ordering and output repair

mod normalization;
mod ordering;
