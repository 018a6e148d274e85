use num::Num;

/// Axis-aligned box, `x`/`y` at the top-left corner.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox<T: Num> {
    pub x: T,
    pub y: T,
    pub width: T,
    pub height: T,
}

impl<T: Num + Copy + PartialOrd> BoundingBox<T> {
    pub fn longest_side(&self) -> T {
        if self.width > self.height {
            self.width
        } else {
            self.height
        }
    }

    pub fn area(&self) -> T {
        self.width * self.height
    }
}

#[test]
fn test_box_sides() {
    let bbox = BoundingBox {
        x: 1.0,
        y: 2.0,
        width: 3.0,
        height: 7.5,
    };
    assert_eq!(bbox.longest_side(), 7.5);
    assert_eq!(bbox.area(), 22.5);
}
