fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fall back to the bundled protoc when none is installed
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()?;
        // SAFETY: build scripts are single-threaded at this point
        unsafe { std::env::set_var("PROTOC", protoc) };
    }

    // Compile proto files to OUT_DIR (used by tonic::include_proto!)
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/org/dash/platform/dapi/v0/core.proto",
                "proto/org/dash/platform/dapi/v0/platform.proto",
                "proto/org/dash/platform/dapi/core.proto",
                "proto/org/dash/platform/dapi/platform.proto",
            ],
            &["proto"],
        )?;

    // Tell Cargo to rerun if proto files change
    println!("cargo:rerun-if-changed=proto/");

    Ok(())
}
