//! Integration tests: the full watch → trigger → trade → resume loop
//! against in-memory feeds and gateways.

mod mocks;
mod scheduling;
mod simulation;
