//! Build script for proto compilation.
//!
//! Compiles the host protocol definition into `OUT_DIR`. Only the server side
//! is generated; the host owns the client.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/provider.proto");

    tonic_prost_build::configure()
        .build_client(false)
        .build_server(true)
        .compile_protos(&["proto/provider.proto"], &["proto"])?;

    Ok(())
}
