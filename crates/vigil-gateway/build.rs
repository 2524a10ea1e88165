//! Build script generating the gRPC service types from the proto contract.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tell Cargo to re-run if the contract changes
    println!("cargo:rerun-if-changed=../../proto/intrusion.proto");

    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure().compile_protos(&["../../proto/intrusion.proto"], &["../../proto"])?;

    Ok(())
}
