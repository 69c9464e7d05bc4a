//! Mesh files: one deflated ZIP per Part holding `mesh.xml`

use std::io::{Read, Seek, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::FORMAT_VERSION;
use crate::error::{CacheError, Result};
use crate::model::{MeshBuffer, MeshId, Triangle, Vertex};

/// Name of the single entry inside a mesh file
pub const MESH_ENTRY: &str = "mesh.xml";

/// Write `mesh` as a mesh file
pub(crate) fn write_mesh_archive<W: Write + Seek>(out: W, id: &MeshId, mesh: &MeshBuffer) -> Result<W> {
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(MESH_ENTRY, options)
        .map_err(|e| CacheError::xml_write(format!("Failed to create mesh entry: {}", e)))?;

    let mut writer = Writer::new(&mut zip);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| CacheError::xml_write(format!("Failed to write XML declaration: {}", e)))?;

    let mut root = BytesStart::new("mesh");
    root.push_attribute(("version", FORMAT_VERSION));
    root.push_attribute(("id", id.as_str()));
    writer
        .write_event(Event::Start(root))
        .map_err(|e| CacheError::xml_write(format!("Failed to write mesh element: {}", e)))?;

    let mut vertices = BytesStart::new("vertices");
    vertices.push_attribute(("count", mesh.points.len().to_string().as_str()));
    writer
        .write_event(Event::Start(vertices))
        .map_err(|e| CacheError::xml_write(format!("Failed to write vertices element: {}", e)))?;
    for vertex in &mesh.points {
        let mut v_elem = BytesStart::new("vertex");
        v_elem.push_attribute(("x", vertex.x.to_string().as_str()));
        v_elem.push_attribute(("y", vertex.y.to_string().as_str()));
        v_elem.push_attribute(("z", vertex.z.to_string().as_str()));
        writer
            .write_event(Event::Empty(v_elem))
            .map_err(|e| CacheError::xml_write(format!("Failed to write vertex: {}", e)))?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("vertices")))
        .map_err(|e| CacheError::xml_write(format!("Failed to close vertices element: {}", e)))?;

    let mut triangles = BytesStart::new("triangles");
    triangles.push_attribute(("count", mesh.triangles.len().to_string().as_str()));
    writer
        .write_event(Event::Start(triangles))
        .map_err(|e| CacheError::xml_write(format!("Failed to write triangles element: {}", e)))?;
    for triangle in &mesh.triangles {
        let mut t_elem = BytesStart::new("triangle");
        t_elem.push_attribute(("v1", triangle.v1.to_string().as_str()));
        t_elem.push_attribute(("v2", triangle.v2.to_string().as_str()));
        t_elem.push_attribute(("v3", triangle.v3.to_string().as_str()));
        writer
            .write_event(Event::Empty(t_elem))
            .map_err(|e| CacheError::xml_write(format!("Failed to write triangle: {}", e)))?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("triangles")))
        .map_err(|e| CacheError::xml_write(format!("Failed to close triangles element: {}", e)))?;

    writer
        .write_event(Event::End(BytesEnd::new("mesh")))
        .map_err(|e| CacheError::xml_write(format!("Failed to close mesh element: {}", e)))?;

    let out = zip
        .finish()
        .map_err(|e| CacheError::xml_write(format!("Failed to finalize ZIP archive: {}", e)))?;
    Ok(out)
}

/// Read a mesh file back
pub(crate) fn read_mesh_archive<R: Read + Seek>(input: R) -> Result<MeshBuffer> {
    let mut archive = ZipArchive::new(input)?;
    let mut xml = String::new();
    {
        let mut entry = archive
            .by_name(MESH_ENTRY)
            .map_err(|_| CacheError::MissingFile(MESH_ENTRY.to_string()))?;
        entry.read_to_string(&mut xml)?;
    }
    parse_mesh_xml(&xml)
}

fn parse_f64(raw: &[u8], field: &str) -> Result<f64> {
    let s = std::str::from_utf8(raw).map_err(|e| CacheError::InvalidXml(e.to_string()))?;
    s.parse::<f64>()
        .map_err(|_| CacheError::parse_error_with_context(field, s, "floating-point number"))
}

fn parse_u32(raw: &[u8], field: &str) -> Result<u32> {
    let s = std::str::from_utf8(raw).map_err(|e| CacheError::InvalidXml(e.to_string()))?;
    s.parse::<u32>()
        .map_err(|_| CacheError::parse_error_with_context(field, s, "vertex index"))
}

fn parse_count(raw: &[u8]) -> Result<usize> {
    let s = std::str::from_utf8(raw).map_err(|e| CacheError::InvalidXml(e.to_string()))?;
    Ok(s.parse::<usize>()?)
}

fn parse_mesh_xml(xml: &str) -> Result<MeshBuffer> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut mesh = MeshBuffer::new();
    let mut declared_points = None;
    let mut declared_triangles = None;
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) => match e.name().as_ref() {
                b"mesh" => {
                    saw_root = true;
                    for attr in e.attributes() {
                        let attr = attr?;
                        if attr.key.as_ref() == b"version" {
                            let found = String::from_utf8_lossy(&attr.value).into_owned();
                            if found != FORMAT_VERSION {
                                return Err(CacheError::VersionMismatch {
                                    expected: FORMAT_VERSION.to_string(),
                                    found,
                                });
                            }
                        }
                    }
                }
                b"vertices" | b"triangles" => {
                    let is_vertices = e.name().as_ref() == b"vertices";
                    for attr in e.attributes() {
                        let attr = attr?;
                        if attr.key.as_ref() == b"count" {
                            let count = parse_count(&attr.value)?;
                            if is_vertices {
                                declared_points = Some(count);
                            } else {
                                declared_triangles = Some(count);
                            }
                        }
                    }
                }
                b"vertex" => {
                    let (mut x, mut y, mut z) = (None, None, None);
                    for attr in e.attributes() {
                        let attr = attr?;
                        match attr.key.as_ref() {
                            b"x" => x = Some(parse_f64(&attr.value, "vertex x coordinate")?),
                            b"y" => y = Some(parse_f64(&attr.value, "vertex y coordinate")?),
                            b"z" => z = Some(parse_f64(&attr.value, "vertex z coordinate")?),
                            _ => {}
                        }
                    }
                    let x = x.ok_or_else(|| CacheError::missing_attribute("vertex", "x"))?;
                    let y = y.ok_or_else(|| CacheError::missing_attribute("vertex", "y"))?;
                    let z = z.ok_or_else(|| CacheError::missing_attribute("vertex", "z"))?;
                    mesh.points.push(Vertex::new(x, y, z));
                }
                b"triangle" => {
                    let (mut v1, mut v2, mut v3) = (None, None, None);
                    for attr in e.attributes() {
                        let attr = attr?;
                        match attr.key.as_ref() {
                            b"v1" => v1 = Some(parse_u32(&attr.value, "triangle v1")?),
                            b"v2" => v2 = Some(parse_u32(&attr.value, "triangle v2")?),
                            b"v3" => v3 = Some(parse_u32(&attr.value, "triangle v3")?),
                            _ => {}
                        }
                    }
                    let v1 = v1.ok_or_else(|| CacheError::missing_attribute("triangle", "v1"))?;
                    let v2 = v2.ok_or_else(|| CacheError::missing_attribute("triangle", "v2"))?;
                    let v3 = v3.ok_or_else(|| CacheError::missing_attribute("triangle", "v3"))?;
                    mesh.triangles.push(Triangle::new(v1, v2, v3));
                }
                other => {
                    return Err(CacheError::InvalidXml(format!(
                        "Unexpected element '<{}>' in mesh file",
                        String::from_utf8_lossy(other)
                    )));
                }
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(CacheError::InvalidXml("mesh file has no <mesh> element".to_string()));
    }
    if declared_points != Some(mesh.points.len()) || declared_triangles != Some(mesh.triangles.len()) {
        return Err(CacheError::Corrupt(format!(
            "mesh declares {:?} points / {:?} triangles but contains {} / {}",
            declared_points,
            declared_triangles,
            mesh.points.len(),
            mesh.triangles.len()
        )));
    }
    if let Some(bad) = mesh.first_out_of_range() {
        return Err(CacheError::Corrupt(format!(
            "triangle {} indexes past the {} stored points",
            bad,
            mesh.points.len()
        )));
    }
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::cuboid_mesh;
    use std::io::Cursor;

    #[test]
    fn test_mesh_archive_round_trip() {
        let mesh = cuboid_mesh([0.1, -2.5, 1e-9], [1.0 / 3.0, 2.0, 7.25]);
        let id = MeshId::from_name("Plate");
        let bytes = write_mesh_archive(Cursor::new(Vec::new()), &id, &mesh)
            .unwrap()
            .into_inner();
        let back = read_mesh_archive(Cursor::new(bytes)).unwrap();
        assert_eq!(back, mesh, "coordinates must survive bit-for-bit");
    }

    #[test]
    fn test_count_mismatch_is_corrupt() {
        let xml = r#"<mesh version="1" id="a"><vertices count="2"><vertex x="0" y="0" z="0"/></vertices><triangles count="0"></triangles></mesh>"#;
        assert!(matches!(parse_mesh_xml(xml), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn test_index_out_of_range_is_corrupt() {
        let xml = r#"<mesh version="1" id="a"><vertices count="1"><vertex x="0" y="0" z="0"/></vertices><triangles count="1"><triangle v1="0" v2="0" v3="4"/></triangles></mesh>"#;
        let err = parse_mesh_xml(xml).unwrap_err();
        assert!(err.to_string().contains("indexes past"), "got {err}");
    }

    #[test]
    fn test_bad_coordinate_reports_field() {
        let xml = r#"<mesh version="1" id="a"><vertices count="1"><vertex x="1,5" y="0" z="0"/></vertices><triangles count="0"/></mesh>"#;
        let err = parse_mesh_xml(xml).unwrap_err();
        assert!(err.to_string().contains("vertex x coordinate"));
    }

    #[test]
    fn test_not_a_zip() {
        let err = read_mesh_archive(Cursor::new(b"plain text".to_vec())).unwrap_err();
        assert!(matches!(err, CacheError::Zip(_)), "got {err}");
    }
}
