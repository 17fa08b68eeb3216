use std::f64::consts::{FRAC_PI_2, PI};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Cartographic {
    pub const fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    pub fn from_degrees(longitude: f64, latitude: f64, height: f64) -> Self {
        Self::new(longitude.to_radians(), latitude.to_radians(), height)
    }

    pub fn is_finite(&self) -> bool {
        self.longitude.is_finite() && self.latitude.is_finite() && self.height.is_finite()
    }
}

/// Geographic extent in radians. `east < west` marks an extent crossing the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Rectangle {
    pub const MAX_VALUE: Rectangle = Rectangle {
        west: -PI,
        south: -FRAC_PI_2,
        east: PI,
        north: FRAC_PI_2,
    };

    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn from_degrees(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self::new(
            west.to_radians(),
            south.to_radians(),
            east.to_radians(),
            north.to_radians(),
        )
    }

    pub fn width(&self) -> f64 {
        let east = if self.east < self.west {
            self.east + 2.0 * PI
        } else {
            self.east
        };
        east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn center(&self) -> Cartographic {
        let mut longitude = self.west + self.width() * 0.5;
        if longitude > PI {
            longitude -= 2.0 * PI;
        }
        Cartographic::new(longitude, (self.south + self.north) * 0.5, 0.0)
    }

    pub fn contains(&self, cartographic: Cartographic) -> bool {
        let mut longitude = cartographic.longitude;
        let latitude = cartographic.latitude;
        let mut east = self.east;
        if east < self.west {
            east += 2.0 * PI;
            if longitude < 0.0 {
                longitude += 2.0 * PI;
            }
        }
        (longitude > self.west || crate::equals_epsilon(longitude, self.west, crate::EPSILON14))
            && (longitude < east || crate::equals_epsilon(longitude, east, crate::EPSILON14))
            && latitude >= self.south
            && latitude <= self.north
    }
}
