// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::{ImagePlane, ImageRef};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MathFunction {
    /// 65535 - a; takes no operand.
    #[default]
    Invert,
    Add,
    Subtract,
    Multiply,
    /// Division by zero gives 0.
    Divide,
    And,
    Or,
    Xor,
    Min,
    Max,
    Average,
    /// |a - b|
    Difference,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperandOrder {
    /// current op operand
    #[default]
    AB,
    /// operand op current
    BA,
}

/// Combines the current plane (a) with a second image (b). Results
/// saturate to the 16-bit range.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMathSettings {
    pub function: MathFunction,
    pub operand: ImageRef,
    pub operand_order: OperandOrder,
}

fn apply(function: MathFunction, a: u16, b: u16) -> u16 {
    match function {
        MathFunction::Invert => u16::MAX - a,
        MathFunction::Add => a.saturating_add(b),
        MathFunction::Subtract => a.saturating_sub(b),
        MathFunction::Multiply => a.saturating_mul(b),
        MathFunction::Divide => {
            if b == 0 {
                0
            } else {
                ((a as f64 / b as f64).round() as u32).min(u16::MAX as u32)
                    as u16
            }
        },
        MathFunction::And => a & b,
        MathFunction::Or => a | b,
        MathFunction::Xor => a ^ b,
        MathFunction::Min => a.min(b),
        MathFunction::Max => a.max(b),
        MathFunction::Average => ((a as u32 + b as u32 + 1) / 2) as u16,
        MathFunction::Difference => a.abs_diff(b),
    }
}

impl Command for ImageMathSettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if self.function == MathFunction::Invert {
            for p in image.pixels_mut().iter_mut() {
                *p = apply(MathFunction::Invert, *p, 0);
            }
            return Ok(());
        }
        let operand = ctx.load_image(&self.operand, image)?;
        let operand = operand.pixels();
        if operand.dimensions() != image.dimensions() {
            return Err(CommandError::plane(
                Validity::Invalid,
                format!("operand is {:?}, image is {:?}",
                        operand.dimensions(), image.dimensions())));
        }
        let pixels = image.pixels_mut();
        for (p, &b) in pixels.iter_mut().zip(operand.iter()) {
            *p = match self.operand_order {
                OperandOrder::AB => apply(self.function, *p, b),
                OperandOrder::BA => apply(self.function, b, *p),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;

    #[test]
    fn test_apply() {
        assert_eq!(apply(MathFunction::Invert, 65000, 0), 535);
        assert_eq!(apply(MathFunction::Add, 65000, 1000), u16::MAX);
        assert_eq!(apply(MathFunction::Subtract, 10, 20), 0);
        assert_eq!(apply(MathFunction::Multiply, 300, 300), u16::MAX);
        assert_eq!(apply(MathFunction::Divide, 100, 0), 0);
        assert_eq!(apply(MathFunction::Divide, 100, 8), 13);
        assert_eq!(apply(MathFunction::Xor, 0b1100, 0b1010), 0b0110);
        assert_eq!(apply(MathFunction::Average, 3, 4), 4);
        assert_eq!(apply(MathFunction::Difference, 3, 10), 7);
    }

    #[test]
    fn test_operand_order() {
        // Channel 0 is 100, channel 1 is 200.
        let fixture = Fixture::new(2);
        let mut iteration = IterationContext::default();
        let mut ctx = fixture.context(&mut iteration);
        let mut settings = ImageMathSettings{
            function: MathFunction::Subtract, operand: ImageRef::channel(1),
            operand_order: OperandOrder::BA};
        let mut image = fixture.current();
        settings.execute(&mut ctx, &mut image, &mut ObjectList::new())
            .unwrap();
        assert_eq!(image.pixels().get_pixel(3, 3)[0], 100);

        settings.operand_order = OperandOrder::AB;
        let mut image = fixture.current();
        settings.execute(&mut ctx, &mut image, &mut ObjectList::new())
            .unwrap();
        assert_eq!(image.pixels().get_pixel(3, 3)[0], 0);

        settings.operand = ImageRef::channel(7);
        let err = settings.execute(&mut ctx, &mut image,
                                   &mut ObjectList::new()).unwrap_err();
        assert_eq!(err.validity, Validity::ChannelOutOfRange);
    }
}  // mod tests.
