// crates/telefeed-media/src/logo.rs
//
// Logo PNG loading. Whatever the file's colour type, the result is a plain
// RGBA raster ready for the overlay blitter.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use telefeed_core::overlay::Raster;

pub(crate) fn load_logo(path: &Path) -> Result<Raster, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(
        png::Transformations::EXPAND | png::Transformations::ALPHA | png::Transformations::STRIP_16,
    );

    let mut reader = decoder.read_info().map_err(|e| e.to_string())?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf).map_err(|e| e.to_string())?;
    buf.truncate(info.buffer_size());

    let (w, h) = (info.width as usize, info.height as usize);
    let rgba = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::GrayscaleAlpha => buf
            .chunks_exact(2)
            .flat_map(|ga| [ga[0], ga[0], ga[0], ga[1]])
            .collect(),
        other => return Err(format!("unexpected colour type {other:?} after expansion")),
    };

    Raster::from_rgba(w, h, rgba).ok_or_else(|| "decoded size mismatch".into())
}
