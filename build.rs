use std::io::Result;

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=proto/telemetry.proto");

    let file_descriptor_set = protox::compile(["proto/telemetry.proto"], ["proto"])
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR not set");
    let descriptor_path = std::path::Path::new(&out_dir).join("telemetry_descriptor.bin");
    std::fs::write(
        &descriptor_path,
        protox::prost::Message::encode_to_vec(&file_descriptor_set),
    )?;

    let mut config = prost_build::Config::new();
    config
        .file_descriptor_set_path(&descriptor_path)
        .skip_protoc_run();

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_with_config(config, &["proto/telemetry.proto"], &["proto"])?;

    Ok(())
}
