use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    // binding 0: location 0 = R32G32_SFLOAT pos, location 1 = R32G32B32_SFLOAT color.
    let vs_src = r#"
#version 450
layout(location = 0) in vec2 inPos;
layout(location = 1) in vec3 inColor;

layout(set = 0, binding = 0) uniform Spin { mat4 model; } u;

layout(location = 0) out vec3 vColor;

void main() {
    vColor = inColor;
    gl_Position = u.model * vec4(inPos, 0.0, 1.0);
}
"#;

    let fs_src = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_0 as u32);
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name) in [
        (vs_src, shaderc::ShaderKind::Vertex, "spin.vert"),
        (fs_src, shaderc::ShaderKind::Fragment, "spin.frag"),
    ] {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).expect("write spir-v");
    }

    println!("cargo:rerun-if-changed=build.rs");
}
