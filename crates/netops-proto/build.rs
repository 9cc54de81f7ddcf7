use tonic_build::manual::{Builder, Method, Service};

fn method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::{input}"))
        .output_type(format!("crate::{output}"))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let gnmi = Service::builder()
        .name("Gnmi")
        .package("gnmi")
        .method(method(
            "capabilities",
            "Capabilities",
            "CapabilityRequest",
            "CapabilityResponse",
        ))
        .method(method("get", "Get", "GetRequest", "GetResponse"))
        .method(method("set", "Set", "SetRequest", "SetResponse"))
        .build();

    Builder::new().compile(&[gnmi]);
    println!("cargo:rerun-if-changed=build.rs");
}
