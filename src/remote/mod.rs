//! Remote platform boundary: the client contract and a scripted simulation.

pub mod client;
pub mod simulated;

pub use client::{
    PlatformConnector, RemoteFilter, RemotePlatformClient, RemoteSpec, SessionToken, StatusRecord,
};
pub use simulated::{RemoteCall, RemoteOp, SimulatedConnector, SimulatedPlatform};
