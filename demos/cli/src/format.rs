//! Mesh file formats
use std::{
    io::{BufRead, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow, bail, ensure};
use clap::ValueEnum;
use strum::IntoEnumIterator;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use meteor::{Format, Mesh, Settings};

/// On-disk mesh formats
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, strum::EnumIter)]
pub enum FileFormat {
    /// `format points triangles` header, one point per line, then triangles
    Text,
    /// Native-endian `i32` header, `f64` point records, `i32` triangles
    Binary,
    /// Wavefront OBJ (write-only)
    Wavefront,
    /// Videoscape `3DG1`, with one color per face
    Videoscape,
}

impl FileFormat {
    fn extension(self) -> &'static str {
        match self {
            FileFormat::Text => "txt",
            FileFormat::Binary => "bin",
            FileFormat::Wavefront => "obj",
            FileFormat::Videoscape => "3dg",
        }
    }

    /// Picks a format from a file's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::iter().find(|f| f.extension().eq_ignore_ascii_case(ext))
    }
}

/// Header of a binary file
#[derive(Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct Header {
    format: i32,
    points: i32,
    triangles: i32,
}

/// Every point record and index triple of a mesh
struct Snapshot {
    format: Format,
    points: Vec<f64>,
    triangles: Vec<i32>,
}

impl Snapshot {
    fn read(mesh: &mut Mesh) -> Result<Self> {
        mesh.rewind();
        let format = mesh.format();
        let n = mesh.point_count();
        let mut points = vec![0.0; n * format.width()];
        let read = mesh.read_points(n, format, &mut points)?;
        ensure!(read == n, "read {read} of {n} points");

        let t = mesh.triangle_count();
        let mut triangles = vec![0; t * 3];
        let read = mesh.read_triangles(t, Format::INDEX, &mut triangles)?;
        ensure!(read == t, "read {read} of {t} triangles");
        Ok(Self {
            format,
            points,
            triangles,
        })
    }

    fn records(&self) -> std::slice::ChunksExact<'_, f64> {
        self.points.chunks_exact(self.format.width())
    }

    /// Returns one field of every point record
    fn field(&self, field: Format) -> impl Iterator<Item = &[f64]> {
        let offset = if field == Format::COORDS {
            Some(0)
        } else {
            self.format.slot(field).map(|s| 3 * (s + 1))
        };
        self.records()
            .filter_map(move |r| offset.map(|i| &r[i..i + 3]))
    }

    fn point_count(&self) -> usize {
        self.points.len() / self.format.width()
    }

    fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }
}

/// Writes the mesh in the given format
pub fn save<W: Write>(mesh: &mut Mesh, format: FileFormat, out: W) -> Result<()> {
    // We're going to do many small writes and will typically be writing to
    // a file, so using a `BufWriter` saves excessive syscalls.
    let mut out = BufWriter::new(out);
    let s = Snapshot::read(mesh)?;
    match format {
        FileFormat::Text => save_text(&s, &mut out)?,
        FileFormat::Binary => save_binary(&s, &mut out)?,
        FileFormat::Wavefront => save_wavefront(&s, &mut out)?,
        FileFormat::Videoscape => save_videoscape(&s, &mut out)?,
    }
    out.flush()?;
    Ok(())
}

fn save_text<W: Write>(s: &Snapshot, out: &mut W) -> Result<()> {
    writeln!(
        out,
        "{} {} {}",
        s.format.bits(),
        s.point_count(),
        s.triangle_count()
    )?;
    for r in s.records() {
        let line: Vec<String> = r.iter().map(|v| v.to_string()).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    for t in s.triangles.chunks_exact(3) {
        writeln!(out, "{} {} {}", t[0], t[1], t[2])?;
    }
    Ok(())
}

fn save_binary<W: Write>(s: &Snapshot, out: &mut W) -> Result<()> {
    let header = Header {
        format: i32::from(s.format.bits()),
        points: i32::try_from(s.point_count())?,
        triangles: i32::try_from(s.triangle_count())?,
    };
    out.write_all(header.as_bytes())?;
    out.write_all(s.points.as_bytes())?;
    out.write_all(s.triangles.as_bytes())?;
    Ok(())
}

fn save_wavefront<W: Write>(s: &Snapshot, out: &mut W) -> Result<()> {
    for p in s.field(Format::COORDS) {
        writeln!(out, "v {} {} {}", p[0], p[1], p[2])?;
    }
    for n in s.field(Format::NORMALS) {
        writeln!(out, "vn {} {} {}", n[0], n[1], n[2])?;
    }
    for t in s.field(Format::TEXCOORDS) {
        if t[2] != 0.0 {
            writeln!(out, "vt {} {} {}", t[0], t[1], t[2])?;
        } else {
            writeln!(out, "vt {} {}", t[0], t[1])?;
        }
    }

    let normals = s.format.contains(Format::NORMALS);
    let tex = s.format.contains(Format::TEXCOORDS);
    for t in s.triangles.chunks_exact(3) {
        write!(out, "f")?;
        for i in t {
            // OBJ indices are 1-based, and each point has its own normal and
            // texture coordinate
            let i = i + 1;
            match (normals, tex) {
                (true, true) => write!(out, " {i}/{i}/{i}")?,
                (true, false) => write!(out, " {i}//{i}")?,
                (false, true) => write!(out, " {i}/{i}")?,
                (false, false) => write!(out, " {i}")?,
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

fn to_byte(v: f64) -> u32 {
    (v.clamp(0.0, 1.0) * 255.0) as u32
}

fn save_videoscape<W: Write>(s: &Snapshot, out: &mut W) -> Result<()> {
    writeln!(out, "3DG1")?;
    writeln!(out, "{}", s.point_count())?;
    for p in s.field(Format::COORDS) {
        writeln!(out, "{} {} {}", p[0], p[1], p[2])?;
    }
    let colors: Vec<&[f64]> = s.field(Format::COLORS).collect();
    for t in s.triangles.chunks_exact(3) {
        let color = if colors.is_empty() {
            0xffffff
        } else {
            let mut c = [0.0; 3];
            for &i in t {
                for (c, v) in c.iter_mut().zip(colors[i as usize]) {
                    *c += v / 3.0;
                }
            }
            to_byte(c[0]) << 16 | to_byte(c[1]) << 8 | to_byte(c[2])
        };
        writeln!(out, "3 {} {} {} 0x{color:x}", t[0], t[1], t[2])?;
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////

/// Reads a mesh in the given format
pub fn load<R: BufRead>(
    format: FileFormat,
    input: R,
    settings: Settings,
) -> Result<Mesh> {
    match format {
        FileFormat::Text => load_text(input, settings),
        FileFormat::Binary => load_binary(input, settings),
        FileFormat::Videoscape => load_videoscape(input, settings),
        FileFormat::Wavefront => bail!("wavefront files cannot be loaded"),
    }
}

/// Numbered, non-blank lines of a text file
struct Lines {
    lines: Vec<(usize, String)>,
    pos: usize,
}

impl Lines {
    fn new<R: BufRead>(input: R) -> Result<Self> {
        let mut lines = vec![];
        for (i, line) in input.lines().enumerate() {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push((i + 1, line));
            }
        }
        Ok(Self { lines, pos: 0 })
    }

    fn next(&mut self) -> Result<(usize, &str)> {
        let (i, line) = self
            .lines
            .get(self.pos)
            .ok_or_else(|| anyhow!("unexpected end of file"))?;
        self.pos += 1;
        Ok((*i, line.as_str()))
    }

    fn rest(&self) -> &[(usize, String)] {
        &self.lines[self.pos..]
    }

    /// Parses exactly `n` whitespace-separated values from the next line
    fn values<T: std::str::FromStr>(&mut self, n: usize) -> Result<Vec<T>>
    where
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let (i, line) = self.next()?;
        parse_values(line, n).with_context(|| format!("line {i}"))
    }
}

fn parse_values<T: std::str::FromStr>(line: &str, n: usize) -> Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let out = line
        .split_whitespace()
        .map(|v| v.parse::<T>())
        .collect::<Result<Vec<_>, _>>()?;
    ensure!(out.len() == n, "expected {n} values, got {}", out.len());
    Ok(out)
}

fn mesh_format(bits: i32) -> Result<Format> {
    u8::try_from(bits)
        .ok()
        .and_then(Format::from_bits)
        .map(|f| f | Format::COORDS)
        .ok_or_else(|| anyhow!("invalid format {bits}"))
}

fn count(v: i32, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| anyhow!("invalid {what} count {v}"))
}

fn load_text<R: BufRead>(input: R, settings: Settings) -> Result<Mesh> {
    let mut lines = Lines::new(input)?;
    let header = lines.values::<i32>(3)?;
    let format = mesh_format(header[0])?;
    let points = count(header[1], "point")?;
    let triangles = count(header[2], "triangle")?;

    let mut data = Vec::with_capacity(points * format.width());
    for _ in 0..points {
        data.extend(lines.values::<f64>(format.width())?);
    }
    let mut inds = Vec::with_capacity(triangles * 3);
    for _ in 0..triangles {
        inds.extend(lines.values::<i32>(3)?);
    }

    let mut mesh = Mesh::with_settings(format, settings);
    mesh.write_points(points, format, &data)?;
    mesh.write_triangles(triangles, Format::INDEX, &inds)?;
    Ok(mesh)
}

fn load_binary<R: Read>(mut input: R, settings: Settings) -> Result<Mesh> {
    let mut header = Header::default();
    input.read_exact(header.as_mut_bytes()).context("reading header")?;
    let format = mesh_format(header.format)?;
    let points = count(header.points, "point")?;
    let triangles = count(header.triangles, "triangle")?;

    let mut data = vec![0.0f64; points * format.width()];
    input
        .read_exact(data.as_mut_bytes())
        .context("reading points")?;
    let mut inds = vec![0i32; triangles * 3];
    input
        .read_exact(inds.as_mut_bytes())
        .context("reading triangles")?;

    let mut mesh = Mesh::with_settings(format, settings);
    mesh.write_points(points, format, &data)?;
    mesh.write_triangles(triangles, Format::INDEX, &inds)?;
    Ok(mesh)
}

/// Parses a Videoscape color, written in hex (`0xRRGGBB`) or decimal
fn parse_color(s: &str) -> Result<[f64; 3]> {
    let c = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .with_context(|| format!("invalid color {s}"))?;
    Ok([16, 8, 0].map(|shift| f64::from((c >> shift) & 0xff) / 255.0))
}

fn load_videoscape<R: BufRead>(input: R, settings: Settings) -> Result<Mesh> {
    let mut lines = Lines::new(input)?;
    let (_, magic) = lines.next()?;
    if magic.trim() != "3DG1" {
        bail!("unhandled magic number: {magic}");
    }
    let points = lines.values::<usize>(1)?[0];
    let mut data = Vec::with_capacity(points * 3);
    for _ in 0..points {
        data.extend(lines.values::<f64>(3)?);
    }

    // Polygons are fanned into triangles, and each point's color is the
    // average of the faces around it
    let mut inds: Vec<i32> = vec![];
    let mut colors = vec![[0.0; 4]; points];
    for (i, line) in lines.rest() {
        let words: Vec<&str> = line.split_whitespace().collect();
        let (n, rest) = words
            .split_first()
            .ok_or_else(|| anyhow!("line {i}: syntax error"))?;
        let n: usize = n.parse().with_context(|| format!("line {i}"))?;
        if n < 3 {
            bail!("line {i}: unsupported vertex count {n}");
        }
        ensure!(
            rest.len() == n + 1,
            "line {i}: expected {n} indices and a color"
        );
        let poly = rest[..n]
            .iter()
            .map(|v| v.parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("line {i}"))?;
        let color = parse_color(rest[n]).with_context(|| format!("line {i}"))?;
        for j in 2..n {
            inds.extend([poly[0], poly[j - 1], poly[j]]);
        }
        for &v in &poly {
            let j = usize::try_from(v)
                .ok()
                .filter(|j| *j < points)
                .ok_or_else(|| anyhow!("line {i}: invalid index {v}"))?;
            let c = &mut colors[j];
            for k in 0..3 {
                c[k] += color[k];
            }
            c[3] += 1.0;
        }
    }

    let format = Format::COORDS | Format::COLORS;
    let mut mesh = Mesh::with_settings(format, settings);
    mesh.write_points(points, Format::COORDS, &data)?;
    mesh.write_triangles(inds.len() / 3, Format::INDEX, &inds)?;

    // Unused points are white
    let avg: Vec<f64> = colors
        .iter()
        .flat_map(|c| {
            if c[3] > 0.0 {
                [c[0] / c[3], c[1] / c[3], c[2] / c[3]]
            } else {
                [1.0; 3]
            }
        })
        .collect();
    mesh.rewind();
    mesh.write_points(points, Format::COLORS, &avg)?;
    Ok(mesh)
}
