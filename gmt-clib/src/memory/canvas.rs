//! Minimal PostScript page the memory engine draws on.
//!
//! Every module call becomes one `%%BeginObject` block whose first comment
//! line is the canonical form of the call. The page deliberately lacks the
//! final `%%EOF`, like a half-written native session file.

use crate::library::Region;

/// Points per centimetre.
pub(crate) const CM: f64 = 72.0 / 2.54;

/// Plot-area geometry of one module call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    pub region: Region,
    pub width: f64,
    pub height: f64,
}

impl Frame {
    /// Page coordinates of a data point, relative to the current origin.
    pub fn project(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.region.west) / self.region.width() * self.width,
            (y - self.region.south) / self.region.height() * self.height,
        )
    }
}

#[derive(Debug)]
pub(crate) struct Canvas {
    name: String,
    body: String,
    origin: (f64, f64),
    objects: usize,
}

impl Canvas {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            body: String::new(),
            origin: (72.0, 72.0),
            objects: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shift(&mut self, dx: f64, dy: f64) {
        self.origin.0 += dx;
        self.origin.1 += dy;
    }

    pub fn begin_object(&mut self, module: &str, summary: &str) {
        self.objects += 1;
        self.body.push_str(&format!(
            "%%BeginObject {module}\n% {summary}\ngsave {:.3} {:.3} translate\n",
            self.origin.0, self.origin.1
        ));
    }

    pub fn end_object(&mut self) {
        self.body.push_str("grestore\n%%EndObject\n");
    }

    pub fn comment(&mut self, text: &str) {
        self.body.push_str(&format!("% {text}\n"));
    }

    pub fn rectangle(&mut self, frame: &Frame, fill: Option<f64>) {
        let path = format!(
            "newpath 0 0 moveto {w:.3} 0 lineto {w:.3} {h:.3} lineto 0 {h:.3} lineto closepath",
            w = frame.width,
            h = frame.height
        );
        match fill {
            Some(gray) => self
                .body
                .push_str(&format!("{path} gsave {gray:.3} setgray fill grestore stroke\n")),
            None => self.body.push_str(&format!("{path} stroke\n")),
        }
    }

    pub fn polyline(&mut self, points: &[(f64, f64)]) {
        let Some(((x0, y0), rest)) = points.split_first() else {
            return;
        };
        self.body.push_str(&format!("newpath {x0:.3} {y0:.3} moveto\n"));
        for (x, y) in rest {
            self.body.push_str(&format!("{x:.3} {y:.3} lineto\n"));
        }
        self.body.push_str("stroke\n");
    }

    pub fn symbols(&mut self, points: &[(f64, f64)], size: f64) {
        let radius = size / 2.0;
        for (x, y) in points {
            self.body.push_str(&format!(
                "newpath {x:.3} {y:.3} {radius:.3} 0 360 arc fill\n"
            ));
        }
    }

    pub fn text(&mut self, x: f64, y: f64, text: &str) {
        let escaped = text
            .replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)");
        self.body.push_str(&format!(
            "/Helvetica 12 selectfont {x:.3} {y:.3} moveto ({escaped}) show\n"
        ));
    }

    /// 8-bit gray image of `nx × ny` samples, first row on top.
    pub fn image(&mut self, frame: &Frame, nx: usize, ny: usize, samples: &[u8]) {
        let hex: String = samples.iter().map(|b| format!("{b:02x}")).collect();
        self.body.push_str(&format!(
            "gsave {w:.3} {h:.3} scale\n{nx} {ny} 8 [{nx} 0 0 -{ny} 0 {ny}] {{<{hex}>}} image\ngrestore\n",
            w = frame.width,
            h = frame.height
        ));
    }

    pub fn object_count(&self) -> usize {
        self.objects
    }

    /// The page so far, without the closing `%%EOF`.
    pub fn finish(self) -> Vec<u8> {
        let mut out = String::with_capacity(self.body.len() + 256);
        out.push_str("%!PS-Adobe-3.0\n");
        out.push_str("%%Creator: gmtnb memory engine\n");
        out.push_str("%%BoundingBox: 0 0 612 792\n");
        out.push_str("%%Pages: 1\n");
        out.push_str("%%EndComments\n");
        out.push_str("%%Page: 1 1\n");
        out.push_str(&self.body);
        out.push_str("showpage\n%%Trailer\n");
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_lacks_eof_and_wraps_objects() {
        let mut canvas = Canvas::new("map");
        let frame = Frame {
            region: Region::new(0.0, 10.0, 0.0, 10.0),
            width: 100.0,
            height: 100.0,
        };
        canvas.begin_object("basemap", "-R0/10/0/10 -JX10c");
        canvas.rectangle(&frame, None);
        canvas.end_object();
        assert_eq!(canvas.object_count(), 1);
        let page = String::from_utf8(canvas.finish()).unwrap();
        assert!(page.starts_with("%!PS-Adobe-3.0"));
        assert!(page.contains("%%BeginObject basemap\n% -R0/10/0/10 -JX10c\n"));
        assert!(!page.contains("%%EOF"));
    }

    #[test]
    fn projection_is_linear() {
        let frame = Frame {
            region: Region::new(0.0, 10.0, -5.0, 5.0),
            width: 200.0,
            height: 100.0,
        };
        assert_eq!(frame.project(5.0, 0.0), (100.0, 50.0));
    }
}
