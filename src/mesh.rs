//! Mesh provider
//!
//! Parses the small OBJ subset the viewer needs (`v`, `vt`, `f` with
//! `position/uv` pairs) into a flat, interleaved triangle list, and
//! generates the built-in panorama sphere in the same format.

use std::f32::consts::PI;
use std::fmt::Write as _;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use log::debug;

use crate::error::{MalformedMesh, StartupError};

/// Interleaved vertex: position followed by texture coordinate (stride = 5 floats).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const STRIDE: usize = std::mem::size_of::<Vertex>();

    /// Get the vertex buffer layout for wgpu
    pub fn buffer_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Self::STRIDE as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                // Position
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // UV
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Triangle list; the vertex count is always a multiple of 3.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    vertices: Vec<Vertex>,
}

impl Mesh {
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

/// Corner order used to split a quad `0 1 2 3` into two triangles.
const QUAD_FAN: [usize; 6] = [0, 1, 2, 0, 2, 3];
const TRIANGLE: [usize; 3] = [0, 1, 2];

/// Parse an OBJ description into a triangle list.
///
/// Indices are 1-based and may only reference positions/UVs declared on
/// earlier lines. Quads are fanned as (0,1,2),(0,2,3); any face that is not
/// a triangle or quad is rejected.
pub fn parse_obj(source: &str) -> Result<Mesh, MalformedMesh> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut uvs: Vec<[f32; 2]> = Vec::new();
    let mut vertices = Vec::new();

    for (number, line) in source.lines().enumerate() {
        let line_no = number + 1;
        let mut fields = line.split_whitespace();
        let Some(tag) = fields.next() else {
            continue;
        };

        match tag {
            "v" => positions.push(parse_floats(line_no, fields)?),
            "vt" => uvs.push(parse_floats(line_no, fields)?),
            "f" => {
                let corners = fields
                    .map(|token| parse_corner(line_no, token, positions.len(), uvs.len()))
                    .collect::<Result<Vec<_>, _>>()?;

                let order: &[usize] = match corners.len() {
                    3 => &TRIANGLE,
                    4 => &QUAD_FAN,
                    n => {
                        return Err(MalformedMesh::new(
                            line_no,
                            format!("face has {n} vertices, only triangles and quads are supported"),
                        ))
                    }
                };

                vertices.extend(order.iter().map(|&corner| {
                    let (v, vt) = corners[corner];
                    Vertex {
                        position: positions[v],
                        uv: uvs[vt],
                    }
                }));
            }
            _ => {}
        }
    }

    debug!(
        "Parsed mesh: {} positions, {} uvs, {} triangles",
        positions.len(),
        uvs.len(),
        vertices.len() / 3
    );

    Ok(Mesh { vertices })
}

/// Read and parse an OBJ file from disk.
pub fn load_obj_file(path: &Path) -> Result<Mesh, StartupError> {
    let source = std::fs::read_to_string(path).map_err(|source| StartupError::MeshIo {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_obj(&source)?)
}

fn parse_floats<'a, const N: usize>(
    line: usize,
    mut fields: impl Iterator<Item = &'a str>,
) -> Result<[f32; N], MalformedMesh> {
    let mut out = [0.0; N];
    for slot in out.iter_mut() {
        let field = fields
            .next()
            .ok_or_else(|| MalformedMesh::new(line, format!("expected {N} components")))?;
        *slot = field
            .parse()
            .map_err(|_| MalformedMesh::new(line, format!("invalid number `{field}`")))?;
    }
    Ok(out)
}

/// Resolve a `position/uv[/normal]` token to 0-based indices.
fn parse_corner(
    line: usize,
    token: &str,
    position_count: usize,
    uv_count: usize,
) -> Result<(usize, usize), MalformedMesh> {
    let mut parts = token.split('/');
    let v = parts.next().unwrap_or_default();
    let vt = parts
        .next()
        .ok_or_else(|| MalformedMesh::new(line, format!("face corner `{token}` has no uv index")))?;
    Ok((
        resolve_index(line, v, position_count, "position")?,
        resolve_index(line, vt, uv_count, "uv")?,
    ))
}

fn resolve_index(line: usize, raw: &str, count: usize, kind: &str) -> Result<usize, MalformedMesh> {
    let index: usize = raw
        .parse()
        .map_err(|_| MalformedMesh::new(line, format!("invalid {kind} index `{raw}`")))?;
    if index == 0 || index > count {
        return Err(MalformedMesh::new(
            line,
            format!("{kind} index {index} out of range 1..={count}"),
        ));
    }
    Ok(index - 1)
}

/// Emit a unit UV sphere as OBJ text.
///
/// Rings run from the north pole (v = 1) to the south pole (v = 0). The
/// seam column is duplicated so u can run 0..=1 without wrapping. Polar
/// rows are triangles, every other row is quads.
pub fn sphere_obj(rings: u32, segments: u32) -> String {
    let mut out = String::new();
    let columns = segments + 1;

    for ring in 0..=rings {
        let theta = PI * ring as f32 / rings as f32;
        for segment in 0..=segments {
            let phi = 2.0 * PI * segment as f32 / segments as f32;
            let _ = writeln!(
                out,
                "v {} {} {}",
                theta.sin() * phi.cos(),
                theta.cos(),
                theta.sin() * phi.sin()
            );
        }
    }
    for ring in 0..=rings {
        for segment in 0..=segments {
            let _ = writeln!(
                out,
                "vt {} {}",
                segment as f32 / segments as f32,
                1.0 - ring as f32 / rings as f32
            );
        }
    }

    let index = |ring: u32, segment: u32| ring * columns + segment + 1;
    for ring in 0..rings {
        for segment in 0..segments {
            let a = index(ring, segment);
            let b = index(ring + 1, segment);
            let c = index(ring + 1, segment + 1);
            let d = index(ring, segment + 1);
            if ring == 0 {
                let _ = writeln!(out, "f {a}/{a} {b}/{b} {c}/{c}");
            } else if ring == rings - 1 {
                let _ = writeln!(out, "f {a}/{a} {b}/{b} {d}/{d}");
            } else {
                let _ = writeln!(out, "f {a}/{a} {b}/{b} {c}/{c} {d}/{d}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
";

    #[test]
    fn triangle_face_emits_three_vertices() {
        let mesh = parse_obj(&format!("{SQUARE}f 1/1 2/2 3/3\n")).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.vertices()[2].position, [1.0, 1.0, 0.0]);
        assert_eq!(mesh.vertices()[2].uv, [1.0, 1.0]);
    }

    #[test]
    fn quad_face_fans_into_two_triangles() {
        let mesh = parse_obj(&format!("{SQUARE}f 1/1 2/2 3/3 4/4\n")).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        let xy: Vec<[f32; 2]> = mesh
            .vertices()
            .iter()
            .map(|v| [v.position[0], v.position[1]])
            .collect();
        assert_eq!(
            xy,
            vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0.0, 1.0]]
        );
    }

    #[test]
    fn indices_are_one_based() {
        let mesh = parse_obj(&format!("{SQUARE}f 4/1 1/2 2/3\n")).unwrap();
        assert_eq!(mesh.vertices()[0].position, [0.0, 1.0, 0.0]);
        assert_eq!(mesh.vertices()[0].uv, [0.0, 0.0]);
    }

    #[test]
    fn zero_index_is_malformed() {
        let err = parse_obj(&format!("{SQUARE}f 0/1 1/2 2/3\n")).unwrap_err();
        assert_eq!(err.line, 9);
    }

    #[test]
    fn out_of_range_uv_is_malformed() {
        assert!(parse_obj(&format!("{SQUARE}f 1/1 2/2 3/5\n")).is_err());
    }

    #[test]
    fn forward_reference_is_malformed() {
        assert!(parse_obj("v 0 0 0\nvt 0 0\nf 1/1 2/1 3/1\nv 1 0 0\nv 1 1 0\n").is_err());
    }

    #[test]
    fn ngon_is_rejected() {
        let source = format!("{SQUARE}v 2 2 0\nf 1/1 2/2 3/3 4/4 5/1\n");
        let err = parse_obj(&source).unwrap_err();
        assert!(err.reason.contains("5 vertices"));
    }

    #[test]
    fn corner_without_uv_is_rejected() {
        assert!(parse_obj(&format!("{SQUARE}f 1 2 3\n")).is_err());
    }

    #[test]
    fn unknown_tags_and_normals_are_ignored() {
        let source = format!("# comment\no thing\n{SQUARE}vn 0 0 1\ns off\nf 1/1/1 2/2/1 3/3/1\n");
        assert_eq!(parse_obj(&source).unwrap().vertex_count(), 3);
    }

    #[test]
    fn sphere_is_a_closed_triangle_list() {
        let (rings, segments) = (8, 12);
        let mesh = parse_obj(&sphere_obj(rings, segments)).unwrap();
        let caps = 2 * segments as usize;
        let body = (rings as usize - 2) * segments as usize * 2;
        assert_eq!(mesh.triangle_count(), caps + body);
        assert_eq!(mesh.vertex_count() % 3, 0);
        for v in mesh.vertices() {
            let [x, y, z] = v.position;
            assert!(((x * x + y * y + z * z).sqrt() - 1.0).abs() < 1e-4);
            assert!((0.0..=1.0).contains(&v.uv[0]) && (0.0..=1.0).contains(&v.uv[1]));
        }
    }

    #[test]
    fn vertex_stride_is_five_floats() {
        assert_eq!(Vertex::STRIDE, 5 * std::mem::size_of::<f32>());
        assert_eq!(Vertex::buffer_layout().array_stride, 20);
    }
}
