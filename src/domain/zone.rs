//! Validated zones ready for evaluation

use crate::domain::geometry::{Circle, GeometryError, Polygon};
use crate::domain::types::{Checkpoint, GeoPoint, Sector, ZoneId, ZoneType};

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneShape {
    Circle(Circle),
    Polygon(Polygon),
}

/// Result of testing one point against one zone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Containment {
    pub inside: bool,
    /// Distance to the center (checkpoints only)
    pub distance_m: Option<f64>,
}

/// An enabled checkpoint or sector whose geometry has been validated
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub zone_type: ZoneType,
    pub id: ZoneId,
    pub name: String,
    pub shape: ZoneShape,
}

impl Zone {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self, GeometryError> {
        Ok(Self {
            zone_type: ZoneType::Checkpoint,
            id: checkpoint.id.clone(),
            name: checkpoint.name.clone(),
            shape: ZoneShape::Circle(Circle::from_checkpoint(checkpoint)?),
        })
    }

    pub fn from_sector(sector: &Sector) -> Result<Self, GeometryError> {
        Ok(Self {
            zone_type: ZoneType::Sector,
            id: sector.id.clone(),
            name: sector.name.clone(),
            shape: ZoneShape::Polygon(Polygon::from_sector(sector)?),
        })
    }

    pub fn evaluate(&self, point: GeoPoint) -> Containment {
        match &self.shape {
            ZoneShape::Circle(circle) => {
                let (inside, distance) = circle.contains(point);
                Containment { inside, distance_m: Some(distance) }
            }
            ZoneShape::Polygon(polygon) => {
                Containment { inside: polygon.contains(point), distance_m: None }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_center_is_inside_with_zero_distance() {
        let zone = Zone::from_checkpoint(&Checkpoint::new("cp1", "Yard", 26.9, -105.8, 100.0))
            .unwrap();
        let c = zone.evaluate(GeoPoint::new(26.9, -105.8));
        assert!(c.inside);
        assert_eq!(c.distance_m, Some(0.0));
    }

    #[test]
    fn test_sector_has_no_distance() {
        let sector = Sector::new(
            "s1",
            "Field",
            vec![[-105.80, 26.90], [-105.70, 26.90], [-105.70, 26.80], [-105.80, 26.80]],
        );
        let zone = Zone::from_sector(&sector).unwrap();
        assert_eq!(zone.zone_type, ZoneType::Sector);
        let c = zone.evaluate(GeoPoint::new(26.85, -105.75));
        assert!(c.inside);
        assert!(c.distance_m.is_none());
    }

    #[test]
    fn test_invalid_sector_rejected() {
        let sector = Sector::new("bad", "", vec![[0.0, 0.0], [1.0, 1.0]]);
        assert!(Zone::from_sector(&sector).is_err());
    }
}
