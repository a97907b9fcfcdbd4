//! Coordinate-space primitives shared by the parser, document, and renderer.
//!
//! All spatial values in this crate are database units (`f64`), per the
//! document's declared [`Units`]. Screen-space and clip-space conversions
//! live in `viewport`, not here.

/// A point in database units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned bounding box in database units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub const EMPTY: Self = Self {
        min_x: f64::INFINITY,
        min_y: f64::INFINITY,
        max_x: f64::NEG_INFINITY,
        max_y: f64::NEG_INFINITY,
    };

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn from_points(points: impl IntoIterator<Item = Point>) -> Self {
        let mut bbox = Self::EMPTY;
        for point in points {
            bbox.extend_point(point);
        }
        bbox
    }

    pub fn extend_point(&mut self, point: Point) {
        self.min_x = self.min_x.min(point.x);
        self.min_y = self.min_y.min(point.y);
        self.max_x = self.max_x.max(point.x);
        self.max_y = self.max_y.max(point.y);
    }

    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn width(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.max_x - self.min_x }
    }

    pub fn height(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.max_y - self.min_y }
    }

    pub fn center(&self) -> Point {
        Point::new((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    pub fn intersects(&self, other: &Self) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }
}

/// An instance placement's accumulated spatial transform.
///
/// Composition order is mandatory: mirror (about the x-axis) → rotate →
/// magnify → translate. Applying mirror as a sign flip inside the rotation
/// produces the wrong result for composed mirror+rotate placements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub rotation_degrees: f64,
    pub mirror: bool,
    pub magnification: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        rotation_degrees: 0.0,
        mirror: false,
        magnification: 1.0,
        translate_x: 0.0,
        translate_y: 0.0,
    };

    /// Composes this (parent) transform with a child instance's local
    /// placement, per spec: `C.rotation = P.rotation + I.rotation`,
    /// `C.mirror = P.mirror XOR I.mirror`, `C.mag = P.mag * I.mag`, and the
    /// child's origin `(I.x, I.y)` is transformed by the parent.
    pub fn compose_child(
        &self,
        instance_rotation_degrees: f64,
        instance_mirror: bool,
        instance_magnification: f64,
        instance_x: f64,
        instance_y: f64,
    ) -> Self {
        let origin = self.apply(Point::new(instance_x, instance_y));
        Self {
            rotation_degrees: self.rotation_degrees + instance_rotation_degrees,
            mirror: self.mirror ^ instance_mirror,
            magnification: self.magnification * instance_magnification,
            translate_x: origin.x,
            translate_y: origin.y,
        }
    }

    /// Applies mirror → rotate → magnify → translate to a point.
    pub fn apply(&self, point: Point) -> Point {
        let mirrored_y = if self.mirror { -point.y } else { point.y };
        let radians = self.rotation_degrees.to_radians();
        let (sin, cos) = (radians.sin(), radians.cos());
        let rotated_x = point.x * cos - mirrored_y * sin;
        let rotated_y = point.x * sin + mirrored_y * cos;
        let scaled_x = self.magnification * rotated_x;
        let scaled_y = self.magnification * rotated_y;
        Point::new(scaled_x + self.translate_x, scaled_y + self.translate_y)
    }

    pub fn apply_bbox(&self, bbox: &BBox) -> BBox {
        if bbox.is_empty() {
            return BBox::EMPTY;
        }
        let corners = [
            Point::new(bbox.min_x, bbox.min_y),
            Point::new(bbox.max_x, bbox.min_y),
            Point::new(bbox.max_x, bbox.max_y),
            Point::new(bbox.min_x, bbox.max_y),
        ];
        BBox::from_points(corners.into_iter().map(|corner| self.apply(corner)))
    }
}

/// A document's declared scale factors: database units per user unit, and
/// user units per meter. All in-memory coordinates are database units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Units {
    pub db_per_user: f64,
    pub user_per_meter: f64,
}

impl Units {
    /// Converts a quantity expressed in database units to meters.
    pub fn db_units_to_meters(&self, db_units: f64) -> f64 {
        db_units * self.db_per_user / self.user_per_meter
    }

    /// Converts a quantity expressed in meters to database units.
    pub fn meters_to_db_units(&self, meters: f64) -> f64 {
        meters * self.user_per_meter / self.db_per_user
    }
}

/// Deterministic layer colour: `hue = (137 * layer + 53 * datatype) mod 360`
/// at fixed saturation/value. Used identically by the main renderer and the
/// minimap so their colouring never diverges.
pub fn layer_hue_degrees(layer: i32, datatype: i32) -> f64 {
    let raw = 137i64 * layer as i64 + 53i64 * datatype as i64;
    let wrapped = raw.rem_euclid(360);
    wrapped as f64
}

/// Converts the deterministic hue (fixed saturation 0.65, value 0.85) to
/// sRGB for surfaces that need concrete colour bytes rather than HSV.
pub fn layer_rgb(layer: i32, datatype: i32) -> (u8, u8, u8) {
    const SATURATION: f64 = 0.65;
    const VALUE: f64 = 0.85;
    let hue = layer_hue_degrees(layer, datatype);
    hsv_to_rgb(hue, SATURATION, VALUE)
}

fn hsv_to_rgb(hue_degrees: f64, saturation: f64, value: f64) -> (u8, u8, u8) {
    let chroma = value * saturation;
    let hue_prime = hue_degrees / 60.0;
    let x = chroma * (1.0 - (hue_prime.rem_euclid(2.0) - 1.0).abs());
    let (r1, g1, b1) = match hue_prime as i64 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = value - chroma;
    let to_byte = |channel: f64| ((channel + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (to_byte(r1), to_byte(g1), to_byte(b1))
}
