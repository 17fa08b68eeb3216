use geodesy::{
    Cartographic, Ellipsoid, GeographicProjection, MapProjection, Projection, Rectangle,
    WEB_MERCATOR_MAXIMUM_LATITUDE, WebMercatorProjection,
};
use glam::{DVec2, DVec3};

/// Deepest level either scheme can address; two root columns at level 30 fill a `u32`.
pub const MAXIMUM_LEVEL: u32 = 30;

fn tiles_at_level(root_tiles: u32, level: u32) -> u32 {
    assert!(
        level <= MAXIMUM_LEVEL,
        "tile level {level} exceeds the deepest level {MAXIMUM_LEVEL}"
    );
    root_tiles << level
}

/// Maps (x, y, level) tile coordinates to geographic extents. Level 0 is the coarsest; every
/// level doubles the tile count along each axis. `y` grows southward.
pub trait TilingScheme: Send + Sync {
    fn ellipsoid(&self) -> &Ellipsoid;
    fn rectangle(&self) -> Rectangle;
    fn projection(&self) -> Projection;
    fn number_of_x_tiles_at_level(&self, level: u32) -> u32;
    fn number_of_y_tiles_at_level(&self, level: u32) -> u32;
    fn tile_xy_to_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle;
    fn position_to_tile_xy(&self, position: Cartographic, level: u32) -> Option<(u32, u32)>;

    fn is_web_mercator(&self) -> bool {
        matches!(self.projection(), Projection::WebMercator(_))
    }
}

/// Equirectangular tiling, two root tiles side by side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeographicTilingScheme {
    projection: GeographicProjection,
    rectangle: Rectangle,
    root_x_tiles: u32,
    root_y_tiles: u32,
}

impl GeographicTilingScheme {
    pub fn new(ellipsoid: Ellipsoid) -> Self {
        Self {
            projection: GeographicProjection::new(ellipsoid),
            rectangle: Rectangle::MAX_VALUE,
            root_x_tiles: 2,
            root_y_tiles: 1,
        }
    }
}

impl Default for GeographicTilingScheme {
    fn default() -> Self {
        Self::new(Ellipsoid::wgs84())
    }
}

impl TilingScheme for GeographicTilingScheme {
    fn ellipsoid(&self) -> &Ellipsoid {
        self.projection.ellipsoid()
    }

    fn rectangle(&self) -> Rectangle {
        self.rectangle
    }

    fn projection(&self) -> Projection {
        Projection::Geographic(self.projection)
    }

    fn number_of_x_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(self.root_x_tiles, level)
    }

    fn number_of_y_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(self.root_y_tiles, level)
    }

    fn tile_xy_to_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let tile_width = self.rectangle.width() / f64::from(self.number_of_x_tiles_at_level(level));
        let tile_height =
            self.rectangle.height() / f64::from(self.number_of_y_tiles_at_level(level));
        let west = self.rectangle.west + f64::from(x) * tile_width;
        let north = self.rectangle.north - f64::from(y) * tile_height;
        Rectangle::new(west, north - tile_height, west + tile_width, north)
    }

    fn position_to_tile_xy(&self, position: Cartographic, level: u32) -> Option<(u32, u32)> {
        if !self.rectangle.contains(position) {
            return None;
        }
        let x_tiles = self.number_of_x_tiles_at_level(level);
        let y_tiles = self.number_of_y_tiles_at_level(level);
        let tile_width = self.rectangle.width() / f64::from(x_tiles);
        let tile_height = self.rectangle.height() / f64::from(y_tiles);

        let mut longitude = position.longitude;
        if self.rectangle.east < self.rectangle.west {
            longitude += std::f64::consts::TAU;
        }
        let x = ((longitude - self.rectangle.west) / tile_width) as u32;
        let y = ((self.rectangle.north - position.latitude) / tile_height) as u32;
        Some((x.min(x_tiles - 1), y.min(y_tiles - 1)))
    }
}

/// Spherical Mercator tiling as used by most slippy-map servers, one root tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WebMercatorTilingScheme {
    projection: WebMercatorProjection,
    rectangle: Rectangle,
    southwest: DVec2,
    northeast: DVec2,
}

impl WebMercatorTilingScheme {
    pub fn new(ellipsoid: Ellipsoid) -> Self {
        let projection = WebMercatorProjection::new(ellipsoid);
        let rectangle = Rectangle::new(
            -std::f64::consts::PI,
            -WEB_MERCATOR_MAXIMUM_LATITUDE,
            std::f64::consts::PI,
            WEB_MERCATOR_MAXIMUM_LATITUDE,
        );
        let southwest =
            projection.project(Cartographic::new(rectangle.west, rectangle.south, 0.0));
        let northeast =
            projection.project(Cartographic::new(rectangle.east, rectangle.north, 0.0));
        Self {
            projection,
            rectangle,
            southwest: DVec2::new(southwest.x, southwest.y),
            northeast: DVec2::new(northeast.x, northeast.y),
        }
    }
}

impl Default for WebMercatorTilingScheme {
    fn default() -> Self {
        Self::new(Ellipsoid::wgs84())
    }
}

impl TilingScheme for WebMercatorTilingScheme {
    fn ellipsoid(&self) -> &Ellipsoid {
        self.projection.ellipsoid()
    }

    fn rectangle(&self) -> Rectangle {
        self.rectangle
    }

    fn projection(&self) -> Projection {
        Projection::WebMercator(self.projection)
    }

    fn number_of_x_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(1, level)
    }

    fn number_of_y_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(1, level)
    }

    fn tile_xy_to_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let tile_width =
            (self.northeast.x - self.southwest.x) / f64::from(self.number_of_x_tiles_at_level(level));
        let tile_height =
            (self.northeast.y - self.southwest.y) / f64::from(self.number_of_y_tiles_at_level(level));
        let west = self.southwest.x + f64::from(x) * tile_width;
        let north = self.northeast.y - f64::from(y) * tile_height;

        let southwest = self
            .projection
            .unproject(DVec3::new(west, north - tile_height, 0.0));
        let northeast = self
            .projection
            .unproject(DVec3::new(west + tile_width, north, 0.0));
        Rectangle::new(
            southwest.longitude,
            southwest.latitude,
            northeast.longitude,
            northeast.latitude,
        )
    }

    fn position_to_tile_xy(&self, position: Cartographic, level: u32) -> Option<(u32, u32)> {
        if !self.rectangle.contains(position) {
            return None;
        }
        let x_tiles = self.number_of_x_tiles_at_level(level);
        let y_tiles = self.number_of_y_tiles_at_level(level);
        let tile_width = (self.northeast.x - self.southwest.x) / f64::from(x_tiles);
        let tile_height = (self.northeast.y - self.southwest.y) / f64::from(y_tiles);

        let projected = self.projection.project(position);
        let x = ((projected.x - self.southwest.x) / tile_width) as u32;
        let y = ((self.northeast.y - projected.y) / tile_height) as u32;
        Some((x.min(x_tiles - 1), y.min(y_tiles - 1)))
    }
}
