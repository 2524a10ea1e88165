//! Generated gRPC types for the ingress service.

#![allow(missing_docs)]
#![allow(clippy::pedantic)]

tonic::include_proto!("intrusion.v1");
