//! Generated gRPC stubs for the Snoozebot ingress and plugin contracts.
//!
//! Both `.proto` files are compiled by `build.rs` via `tonic-prost-build`;
//! the modules below just give the generated code a stable import path so
//! `snoozebot-agent` never has to spell out `tonic::include_proto!` itself.

pub mod ingress {
    tonic::include_proto!("snoozebot.v1");
}

pub mod plugin {
    tonic::include_proto!("snoozebot.plugin.v1");
}
