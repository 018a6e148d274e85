use crate::Image;
use ndarray::s;

/// Mirror axis. `Horizontal` reverses columns, `Vertical` reverses rows.
/// Both are their own inverse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Flip {
    Horizontal,
    Vertical,
}

impl Image {
    pub fn flip(&self, flip: Flip) -> Image {
        let data = match flip {
            Flip::Horizontal => self.data.slice(s![.., ..;-1, ..]).to_owned(),
            Flip::Vertical => self.data.slice(s![..;-1, .., ..]).to_owned(),
        };

        Image { data }
    }
}

#[test]
fn test_flip_is_self_inverse() {
    use ndarray::Array3;

    let image = Image::new(Array3::from_shape_fn((3, 4, 2), |(y, x, c)| {
        (y * 100 + x * 10 + c) as f32
    }))
    .unwrap();

    let horizontal = image.flip(Flip::Horizontal);
    assert_eq!(horizontal.raw_data()[[0, 0, 1]], 31.0);
    assert_eq!(horizontal.flip(Flip::Horizontal), image);

    let vertical = image.flip(Flip::Vertical);
    assert_eq!(vertical.raw_data()[[0, 1, 0]], 210.0);
    assert_eq!(vertical.flip(Flip::Vertical), image);
}
