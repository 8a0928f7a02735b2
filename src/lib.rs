//! gleaner: a command-line RSS aggregator.
//!
//! Users register, follow feeds, and run `gleaner agg <interval>` to
//! poll followed feeds on a fixed cadence, persisting newly discovered
//! posts. The interesting part lives in [`agg`]: the polling loop
//! tolerates bad feeds and bad items without stopping, and only a
//! failure of the store itself terminates it.

pub mod agg;
pub mod cli;
pub mod config;
pub mod feed;
pub mod storage;
