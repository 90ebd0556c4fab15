/// Build script for mini_engine_rt
///
/// # Shader Compilation Strategy:
/// - DXR shaders are compiled offline with dxc (`-T lib_6_3`) into a DXIL library
///   that is loaded at runtime from `raytracing.shader_library`
/// - The HLSL source is tracked here so entry point changes trigger a rebuild
fn main() {
    println!("cargo:rerun-if-changed=assets/shaders/raytracing.hlsl");
}
