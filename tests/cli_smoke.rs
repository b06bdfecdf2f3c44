use std::path::PathBuf;

const SCENE: &str = r##"
use container, image, frame, interpolate;
export const DURATION = 12;
function scene() {
  let x = interpolate(frame(), [0, 11], [0, 110]);
  return container({ fill: "#101018" }, [
    image("icon:play", { x: x, y: 10, width: 24, height: 24 }),
  ]);
}
export default scene;
"##;

fn bin() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_vignette")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "vignette.exe"
            } else {
                "vignette"
            });
            p
        })
}

#[test]
fn cli_frame_writes_a_frame_plan() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();

    let scene_path = dir.join("scene.vg");
    let out_path = dir.join("frame.json");
    let _ = std::fs::remove_file(&out_path);
    std::fs::write(&scene_path, SCENE).unwrap();

    let status = std::process::Command::new(bin())
        .args([
            "frame",
            "--in",
            scene_path.to_string_lossy().as_ref(),
            "--frame",
            "6",
            "--out",
        ])
        .arg(out_path.to_string_lossy().as_ref())
        .status()
        .unwrap();

    assert!(status.success());
    let text = std::fs::read_to_string(&out_path).unwrap();
    let plan: vignette::FramePlan = serde_json::from_str(&text).unwrap();
    assert_eq!(plan.frame, vignette::FrameIndex(6));
    assert_eq!(plan.nodes.len(), 2);
}

#[test]
fn cli_check_repairs_and_reports() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();

    // missing acquisitions and DURATION: check must report the fixes
    let scene_path = dir.join("faulty.vg");
    std::fs::write(
        &scene_path,
        "function scene() { return container({}, []); } export default scene;",
    )
    .unwrap();

    let output = std::process::Command::new(bin())
        .args(["check", "--in", scene_path.to_string_lossy().as_ref()])
        .output()
        .unwrap();

    assert!(output.status.success());
    let report: vignette::ValidationResult =
        serde_json::from_slice(&output.stdout).unwrap();
    assert!(report.valid);
    assert!(!report.fixes_applied.is_empty());
    assert!(report.source.contains("export const DURATION = 150;"));
}

#[test]
fn cli_render_writes_every_frame() {
    let dir = PathBuf::from("target").join("cli_smoke_render");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    let scene_path = dir.join("scene.vg");
    std::fs::write(&scene_path, SCENE).unwrap();
    let out_dir = dir.join("frames");

    let status = std::process::Command::new(bin())
        .args([
            "render",
            "--in",
            scene_path.to_string_lossy().as_ref(),
            "--out",
        ])
        .arg(out_dir.to_string_lossy().as_ref())
        .status()
        .unwrap();

    assert!(status.success());
    let count = std::fs::read_dir(&out_dir).unwrap().count();
    assert_eq!(count, 12);
}
