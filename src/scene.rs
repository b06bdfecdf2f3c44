//! Structural frame output: the scene node tree a factory call returns, and the
//! flat z-ordered draw list (`FramePlan`) both execution contexts produce.
//!
//! Equivalence between the module path and the sandbox path is defined over
//! `FramePlan`, with media sources compared in canonical form (an inlined icon
//! equals its `icon:` reference).

use crate::{
    assets,
    core::{Canvas, Fps, FrameIndex},
};

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct FrameCtx {
    pub frame: FrameIndex,
    pub duration: FrameIndex,
    pub fps: Fps,
    pub canvas: Canvas,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MediaLayout {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub opacity: f64,
    pub rotation_rad: f64,
    pub scale: f64,
}

impl Default for MediaLayout {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            opacity: 1.0,
            rotation_rad: 0.0,
            scale: 1.0,
        }
    }
}

/// Node tree as returned by a scene factory call. Flattened into a [`FramePlan`]
/// before leaving the execution boundary.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SceneNode {
    Container {
        fill: Option<String>,
        opacity: f64,
        children: Vec<SceneNode>,
    },
    Group {
        children: Vec<SceneNode>,
    },
    Image {
        source: String,
        layout: MediaLayout,
    },
    Video {
        source: String,
        layout: MediaLayout,
    },
    Audio {
        source: String,
        volume: f64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PlaceholderKind {
    Loading,
    Error,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum PlanNodeKind {
    Fill {
        color: String,
        width: f64,
        height: f64,
    },
    Media {
        kind: MediaKind,
        source: String,
        width: f64,
        height: f64,
    },
    Audio {
        source: String,
        volume: f64,
    },
    Placeholder {
        kind: PlaceholderKind,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlanNode {
    pub z: i32,
    pub opacity: f64,
    pub transform: kurbo::Affine,
    pub kind: PlanNodeKind,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FramePlan {
    pub frame: FrameIndex,
    pub canvas: Canvas,
    pub nodes: Vec<PlanNode>,
}

impl FramePlan {
    /// Flatten a scene node tree into painter's-order draw nodes.
    pub fn from_tree(ctx: &FrameCtx, root: &SceneNode) -> Self {
        let mut nodes = Vec::new();
        let mut z = 0i32;
        flatten(ctx, root, 1.0, &mut z, &mut nodes);
        Self {
            frame: ctx.frame,
            canvas: ctx.canvas,
            nodes,
        }
    }

    /// The fixed loading-fallback contract: a dim full-bleed fill plus a spinner.
    pub fn loading_placeholder(ctx: &FrameCtx) -> Self {
        placeholder_plan(ctx, PlaceholderKind::Loading, "loading")
    }

    /// The fixed error-fallback contract: visibly distinct from real content.
    pub fn error_placeholder(ctx: &FrameCtx, message: impl Into<String>) -> Self {
        placeholder_plan(ctx, PlaceholderKind::Error, message)
    }

    pub fn is_placeholder(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n.kind, PlanNodeKind::Placeholder { .. }))
    }

    /// Structural equivalence: same draw list modulo media-source representation
    /// (URL-vs-inlined is an environment concern, not a visual one).
    pub fn structurally_equivalent(&self, other: &Self) -> bool {
        if self.frame != other.frame
            || self.canvas != other.canvas
            || self.nodes.len() != other.nodes.len()
        {
            return false;
        }
        self.nodes
            .iter()
            .zip(&other.nodes)
            .all(|(a, b)| plan_nodes_equivalent(a, b))
    }

    /// Stable content hash of the plan. Seeded FNV-1a over every field, useful
    /// for determinism checks and cheap frame-level caching.
    pub fn fingerprint(&self) -> u64 {
        let mut h = Fnv1a64::new(0xcbf2_9ce4_8422_2325);
        h.write_u64(self.frame.0);
        h.write_u64(u64::from(self.canvas.width));
        h.write_u64(u64::from(self.canvas.height));
        h.write_u64(self.nodes.len() as u64);
        for node in &self.nodes {
            h.write_u64(node.z as u64);
            h.write_u64(node.opacity.to_bits());
            for c in node.transform.as_coeffs() {
                h.write_u64(c.to_bits());
            }
            match &node.kind {
                PlanNodeKind::Fill {
                    color,
                    width,
                    height,
                } => {
                    h.write_u8(0);
                    h.write_str(color);
                    h.write_u64(width.to_bits());
                    h.write_u64(height.to_bits());
                }
                PlanNodeKind::Media {
                    kind,
                    source,
                    width,
                    height,
                } => {
                    h.write_u8(1);
                    h.write_u8(match kind {
                        MediaKind::Image => 0,
                        MediaKind::Video => 1,
                    });
                    h.write_str(source);
                    h.write_u64(width.to_bits());
                    h.write_u64(height.to_bits());
                }
                PlanNodeKind::Audio { source, volume } => {
                    h.write_u8(2);
                    h.write_str(source);
                    h.write_u64(volume.to_bits());
                }
                PlanNodeKind::Placeholder { kind, message } => {
                    h.write_u8(3);
                    h.write_u8(match kind {
                        PlaceholderKind::Loading => 0,
                        PlaceholderKind::Error => 1,
                    });
                    h.write_str(message);
                }
            }
        }
        h.finish()
    }
}

fn placeholder_plan(ctx: &FrameCtx, kind: PlaceholderKind, message: impl Into<String>) -> FramePlan {
    FramePlan {
        frame: ctx.frame,
        canvas: ctx.canvas,
        nodes: vec![
            PlanNode {
                z: 0,
                opacity: 1.0,
                transform: kurbo::Affine::IDENTITY,
                kind: PlanNodeKind::Fill {
                    color: match kind {
                        PlaceholderKind::Loading => "#1a1a22".to_string(),
                        PlaceholderKind::Error => "#2a1214".to_string(),
                    },
                    width: f64::from(ctx.canvas.width),
                    height: f64::from(ctx.canvas.height),
                },
            },
            PlanNode {
                z: 1,
                opacity: 1.0,
                transform: kurbo::Affine::translate((
                    f64::from(ctx.canvas.width) / 2.0 - 12.0,
                    f64::from(ctx.canvas.height) / 2.0 - 12.0,
                )),
                kind: PlanNodeKind::Placeholder {
                    kind,
                    message: message.into(),
                },
            },
        ],
    }
}

fn plan_nodes_equivalent(a: &PlanNode, b: &PlanNode) -> bool {
    if a.z != b.z || a.opacity != b.opacity || a.transform != b.transform {
        return false;
    }
    match (&a.kind, &b.kind) {
        (
            PlanNodeKind::Media {
                kind: ka,
                source: sa,
                width: wa,
                height: ha,
            },
            PlanNodeKind::Media {
                kind: kb,
                source: sb,
                width: wb,
                height: hb,
            },
        ) => {
            ka == kb
                && wa == wb
                && ha == hb
                && assets::normalize_source(sa) == assets::normalize_source(sb)
        }
        (
            PlanNodeKind::Audio {
                source: sa,
                volume: va,
            },
            PlanNodeKind::Audio {
                source: sb,
                volume: vb,
            },
        ) => va == vb && assets::normalize_source(sa) == assets::normalize_source(sb),
        (ka, kb) => ka == kb,
    }
}

fn media_transform(layout: &MediaLayout) -> kurbo::Affine {
    kurbo::Affine::translate((layout.x, layout.y))
        * kurbo::Affine::rotate(layout.rotation_rad)
        * kurbo::Affine::scale(layout.scale)
}

fn flatten(
    ctx: &FrameCtx,
    node: &SceneNode,
    parent_opacity: f64,
    z: &mut i32,
    out: &mut Vec<PlanNode>,
) {
    match node {
        SceneNode::Container {
            fill,
            opacity,
            children,
        } => {
            let opacity = (parent_opacity * opacity).clamp(0.0, 1.0);
            if let Some(color) = fill {
                out.push(PlanNode {
                    z: *z,
                    opacity,
                    transform: kurbo::Affine::IDENTITY,
                    kind: PlanNodeKind::Fill {
                        color: color.clone(),
                        width: f64::from(ctx.canvas.width),
                        height: f64::from(ctx.canvas.height),
                    },
                });
                *z += 1;
            }
            for child in children {
                flatten(ctx, child, opacity, z, out);
            }
        }
        SceneNode::Group { children } => {
            for child in children {
                flatten(ctx, child, parent_opacity, z, out);
            }
        }
        SceneNode::Image { source, layout } => {
            push_media(MediaKind::Image, source, layout, parent_opacity, z, out);
        }
        SceneNode::Video { source, layout } => {
            push_media(MediaKind::Video, source, layout, parent_opacity, z, out);
        }
        SceneNode::Audio { source, volume } => {
            out.push(PlanNode {
                z: *z,
                opacity: 1.0,
                transform: kurbo::Affine::IDENTITY,
                kind: PlanNodeKind::Audio {
                    source: source.clone(),
                    volume: volume.clamp(0.0, 1.0),
                },
            });
            *z += 1;
        }
    }
}

fn push_media(
    kind: MediaKind,
    source: &str,
    layout: &MediaLayout,
    parent_opacity: f64,
    z: &mut i32,
    out: &mut Vec<PlanNode>,
) {
    let opacity = (parent_opacity * layout.opacity).clamp(0.0, 1.0);
    if opacity <= 0.0 {
        return;
    }
    out.push(PlanNode {
        z: *z,
        opacity,
        transform: media_transform(layout),
        kind: PlanNodeKind::Media {
            kind,
            source: source.to_string(),
            width: layout.width,
            height: layout.height,
        },
    });
    *z += 1;
}

#[derive(Clone, Copy)]
struct Fnv1a64(u64);

impl Fnv1a64 {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write_bytes(s.as_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let mut h = self.0;
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0000_0100_0000_01B3);
        }
        self.0 = h;
    }

    fn finish(self) -> u64 {
        self.0
    }
}
