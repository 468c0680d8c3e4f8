use protobuf_codegen::Customize;

fn main() {
    protobuf_codegen::Codegen::new()
        .pure()
        .cargo_out_dir("proto")
        .inputs(["proto/relaying.proto"])
        .include("proto")
        .customize(Customize::default().gen_mod_rs(true))
        .run_from_script();
}
