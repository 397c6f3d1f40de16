//! PLY point cloud encoding.
//!
//! Writes vertices as `float x y z` plus `uchar red green blue`, either
//! binary little-endian (default, compact) or ASCII (human readable).

use crate::recording::{ColoredPoint, PointCloudSnapshot};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Read, Write};

/// PLY body encoding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlyFormat {
    #[default]
    Binary,
    Ascii,
}

impl PlyFormat {
    fn header_name(&self) -> &'static str {
        match self {
            Self::Binary => "binary_little_endian",
            Self::Ascii => "ascii",
        }
    }
}

impl std::fmt::Display for PlyFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Ascii => write!(f, "ascii"),
        }
    }
}

/// Writes `points` as a complete PLY document.
pub fn write_ply<W: Write>(out: &mut W, points: &PointCloudSnapshot, format: PlyFormat) -> io::Result<()> {
    write!(
        out,
        "ply\n\
         format {} 1.0\n\
         comment generated by depthcap {}\n\
         element vertex {}\n\
         property float x\n\
         property float y\n\
         property float z\n\
         property uchar red\n\
         property uchar green\n\
         property uchar blue\n\
         end_header\n",
        format.header_name(),
        env!("CARGO_PKG_VERSION"),
        points.len()
    )?;

    match format {
        PlyFormat::Binary => {
            let mut record = [0u8; 15];
            for point in points.iter() {
                for (axis, value) in point.position.iter().enumerate() {
                    record[axis * 4..axis * 4 + 4].copy_from_slice(&value.to_le_bytes());
                }
                record[12..15].copy_from_slice(&point.color);
                out.write_all(&record)?;
            }
        }
        PlyFormat::Ascii => {
            for point in points.iter() {
                let [x, y, z] = point.position;
                let [r, g, b] = point.color;
                writeln!(out, "{x} {y} {z} {r} {g} {b}")?;
            }
        }
    }
    Ok(())
}

/// Parsed PLY header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyHeader {
    pub format: PlyFormat,
    pub vertex_count: usize,
    pub properties: Vec<String>,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Reads the header, leaving `input` positioned at the first vertex.
pub fn read_header<R: BufRead>(input: &mut R) -> io::Result<PlyHeader> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    if line.trim_end() != "ply" {
        return Err(invalid("missing ply magic"));
    }

    let mut format = None;
    let mut vertex_count = None;
    let mut properties = Vec::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(invalid("header not terminated"));
        }
        let mut words = line.split_whitespace();
        match words.next() {
            Some("format") => {
                format = match words.next() {
                    Some("binary_little_endian") => Some(PlyFormat::Binary),
                    Some("ascii") => Some(PlyFormat::Ascii),
                    other => return Err(invalid(format!("unsupported format {other:?}"))),
                }
            }
            Some("element") if words.next() == Some("vertex") => {
                let count = words
                    .next()
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| invalid("bad vertex count"))?;
                vertex_count = Some(count);
            }
            Some("property") => {
                if let Some(name) = words.last() {
                    properties.push(name.to_string());
                }
            }
            Some("end_header") => break,
            _ => {}
        }
    }

    Ok(PlyHeader {
        format: format.ok_or_else(|| invalid("missing format line"))?,
        vertex_count: vertex_count.ok_or_else(|| invalid("missing vertex element"))?,
        properties,
    })
}

/// Reads a whole file written by [`write_ply`].
pub fn read_ply<R: BufRead>(input: &mut R) -> io::Result<(PlyHeader, Vec<ColoredPoint>)> {
    let header = read_header(input)?;
    let mut points = Vec::with_capacity(header.vertex_count);

    match header.format {
        PlyFormat::Binary => {
            let mut record = [0u8; 15];
            for _ in 0..header.vertex_count {
                input.read_exact(&mut record)?;
                let f = |i: usize| f32::from_le_bytes([record[i], record[i + 1], record[i + 2], record[i + 3]]);
                points.push(ColoredPoint {
                    position: [f(0), f(4), f(8)],
                    color: [record[12], record[13], record[14]],
                });
            }
        }
        PlyFormat::Ascii => {
            let mut line = String::new();
            for _ in 0..header.vertex_count {
                line.clear();
                input.read_line(&mut line)?;
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() != 6 {
                    return Err(invalid(format!("bad vertex line: {}", line.trim_end())));
                }
                let float = |s: &str| s.parse::<f32>().map_err(|e| invalid(e.to_string()));
                let byte = |s: &str| s.parse::<u8>().map_err(|e| invalid(e.to_string()));
                points.push(ColoredPoint {
                    position: [float(fields[0])?, float(fields[1])?, float(fields[2])?],
                    color: [byte(fields[3])?, byte(fields[4])?, byte(fields[5])?],
                });
            }
        }
    }

    // anything after the declared vertices means a torn or foreign file
    let mut rest = Vec::new();
    input.read_to_end(&mut rest)?;
    if !rest.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(invalid("trailing data after vertices"));
    }

    Ok((header, points))
}
