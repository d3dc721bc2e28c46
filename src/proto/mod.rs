//! Generated protobuf types for the echo service.

pub mod echo {
    tonic::include_proto!("echo");

    /// Descriptor set consumed by the gRPC reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("echo_descriptor");
}
