// Build script to compile the demo's GLSL shaders to SPIR-V
//
// Output goes to OUT_DIR. Without glslc the outputs are left empty and the
// demo falls back to clearing the screen.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADERS: [&str; 2] = ["triangle.vert", "triangle.frag"];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    for shader in SHADERS {
        let input = Path::new("shaders").join(shader);
        let output = out_dir.join(format!("{}.spv", shader));
        compile_shader(&input, &output);
    }
}

fn compile_shader(input: &Path, output: &Path) {
    let result = Command::new("glslc").arg(input).arg("-o").arg(output).status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input.display(), status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} left empty", e, output.display());
            fs::write(output, b"").expect("cannot write shader placeholder");
        }
    }
}
