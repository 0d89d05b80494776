fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/stringsvc/v1/stringsvc.proto");
    println!("cargo:rerun-if-changed=proto");

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .codec_path("crate::codec::StrictCodec")
        .compile_protos(&["proto/stringsvc/v1/stringsvc.proto"], &["proto"])?;

    Ok(())
}
