//! Captured HTTP traffic: flow file reading and transcript rendering.

pub mod flows;
pub mod transcript;

pub use flows::{read_flows, Flow, FlowRequest, FlowResponse};
pub use transcript::render_transcript;
