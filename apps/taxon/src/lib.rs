//! # Taxon
//!
//! Operator front end for the `taxon-core` metamodel engine.

pub mod cli;
