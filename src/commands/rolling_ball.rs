// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;
use crate::rolling_ball::{subtract_background, BallType};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingBallSettings {
    pub ball_type: BallType,
    pub radius: f64,
    pub light_background: bool,
    pub presmooth: bool,
}

impl Default for RollingBallSettings {
    fn default() -> Self {
        RollingBallSettings{ball_type: BallType::Ball, radius: 50.0,
                            light_background: false, presmooth: true}
    }
}

impl Command for RollingBallSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if self.radius.is_nan() || self.radius <= 0.0 {
            return Err(CommandError::plane(
                Validity::InvalidKernelSize,
                format!("ball radius {} must be positive", self.radius)));
        }
        subtract_background(image.pixels_mut(), self.radius, self.ball_type,
                            self.light_background, self.presmooth);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;
    use crate::plane::Gray16Image;

    #[test]
    fn test_flat_background_removed() {
        let mut pixels = Gray16Image::from_pixel(40, 40, Luma([2000]));
        for y in 18..22 {
            for x in 18..22 {
                pixels.put_pixel(x, y, Luma([5000]));
            }
        }
        let fixture = Fixture::with_planes(vec![pixels]);
        let mut iteration = IterationContext::default();
        let mut image = fixture.current();
        let mut ctx = fixture.context(&mut iteration);
        for ball_type in [BallType::Ball, BallType::Paraboloid] {
            let mut plane = image.clone();
            let settings = RollingBallSettings{
                ball_type, radius: 10.0, presmooth: false,
                ..RollingBallSettings::default()};
            settings.execute(&mut ctx, &mut plane, &mut ObjectList::new())
                .unwrap();
            let result = plane.pixels();
            assert!(result.get_pixel(2, 2)[0] <= 1, "{:?}", ball_type);
            assert!(result.get_pixel(20, 20)[0] >= 2900, "{:?}", ball_type);
        }

        let settings = RollingBallSettings{radius: 0.0,
                                           ..RollingBallSettings::default()};
        let err = settings.execute(&mut ctx, &mut image,
                                   &mut ObjectList::new()).unwrap_err();
        assert_eq!(err.validity, Validity::InvalidKernelSize);
    }
}  // mod tests.
