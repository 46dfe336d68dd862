use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// One compute kernel per file; names match `Kernel::name`.
const KERNELS: [&str; 9] = [
    "clear",
    "reproject",
    "merge_half",
    "merge_full",
    "first_leg",
    "pull",
    "push",
    "last_stretch",
    "resolve",
];

fn main() {
    let dest = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");

    // ========================================================================
    // SPIR-V Shader Compilation (via glslc from Vulkan SDK)
    // ========================================================================
    // Compute only, Vulkan 1.2. Without glslc the modules are written empty
    // and the backend reports the device as unsupported at runtime.
    let shader_dir = Path::new("shaders");
    let spirv_dir = Path::new(&dest).join("spirv");
    fs::create_dir_all(&spirv_dir).expect("failed to create spirv output directory");

    println!("cargo:rerun-if-changed=shaders/common.glsl");

    let glslc = find_glslc();
    match &glslc {
        Some(path) => println!("cargo:warning=Using glslc: {}", path.display()),
        None => println!(
            "cargo:warning=glslc not found, frame generation shaders will be empty. \
             Install the Vulkan SDK or put glslc on PATH."
        ),
    }

    let mut any_failed = false;
    for kernel in KERNELS {
        let filename = format!("{kernel}.comp.glsl");
        let src_path = shader_dir.join(&filename);
        let spv_path = spirv_dir.join(format!("{kernel}.comp.spv"));
        println!("cargo:rerun-if-changed=shaders/{filename}");

        let compiled = match &glslc {
            Some(glslc) => compile_shader(glslc, shader_dir, &src_path, &spv_path, &filename),
            None => false,
        };
        if !compiled {
            any_failed |= glslc.is_some();
            fs::write(&spv_path, []).expect("failed to write empty shader module");
        }
    }

    if any_failed {
        panic!("Some shaders failed to compile (see warnings above)");
    }
}

/// Compile a single compute shader to SPIR-V.
fn compile_shader(glslc: &Path, include_dir: &Path, src_path: &Path, spv_path: &Path, filename: &str) -> bool {
    let output = Command::new(glslc)
        .arg("-fshader-stage=compute")
        .args(["--target-env=vulkan1.2", "-O", "-I"])
        .arg(include_dir)
        .arg("-o")
        .arg(spv_path)
        .arg(src_path)
        .output();

    match output {
        Ok(result) => {
            let stderr = String::from_utf8_lossy(&result.stderr);
            if result.status.success() {
                if !stderr.is_empty() {
                    println!("cargo:warning=glslc {filename}: {stderr}");
                }
                true
            } else {
                println!("cargo:warning=glslc FAILED {filename}: {stderr}");
                false
            }
        }
        Err(e) => {
            println!("cargo:warning=glslc: failed to run for {filename}: {e}");
            false
        }
    }
}

/// Find glslc binary: check PATH, then VULKAN_SDK.
fn find_glslc() -> Option<PathBuf> {
    if let Ok(output) = Command::new("glslc").arg("--version").output() {
        if output.status.success() {
            return Some(PathBuf::from("glslc"));
        }
    }

    if let Ok(sdk) = env::var("VULKAN_SDK") {
        for candidate in [
            PathBuf::from(&sdk).join("Bin").join("glslc.exe"),
            PathBuf::from(&sdk).join("bin").join("glslc"),
        ] {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}
