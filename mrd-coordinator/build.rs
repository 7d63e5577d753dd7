fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("vendored protoc binary"),
    );
    // Compile the proto files via `prost`, generating service stubs and
    // message definitions for use with `tonic`.
    tonic_build::compile_protos("../protos/coordinator.proto")?;
    tonic_build::compile_protos("../protos/worker.proto")?;
    tonic_build::compile_protos("../protos/services.proto")?;
    Ok(())
}
