use glam::Vec2;

/// An axis-aligned rectangle with a premultiplied-alpha-free linear RGBA color.
/// Coordinates are in pixels, origin at the window's top left.
pub struct SceneRect {
    pub min: Vec2,
    pub max: Vec2,
    pub color: [f32; 4],
}

/// The static vector scene drawn every frame.
pub struct Scene {
    pub base_color: wgpu::Color,
    pub rects: Vec<SceneRect>,
}

impl Scene {
    /// Horizontal and vertical stripes, demonstrating gamma-corrected alpha blending.
    /// Each horizontal color comes in an opaque/translucent pair crossing the vertical
    /// bars.
    pub fn stripes() -> Self {
        let rects = [
            ((20.0, 20.0, 60.0, 500.0), srgb(24, 234, 34, 255)),
            ((70.0, 20.0, 110.0, 500.0), srgb(234, 232, 24, 255)),
            ((120.0, 20.0, 160.0, 500.0), srgb(24, 234, 200, 255)),
            ((170.0, 20.0, 210.0, 500.0), srgb(238, 70, 166, 255)),
            ((0.0, 40.0, 800.0, 50.0), srgb(255, 0, 0, 255)),
            ((0.0, 50.0, 800.0, 60.0), srgb(255, 0, 0, 128)),
            ((0.0, 100.0, 800.0, 110.0), srgb(0, 127, 255, 255)),
            ((0.0, 110.0, 800.0, 120.0), srgb(0, 127, 255, 128)),
            ((0.0, 160.0, 800.0, 170.0), srgb(147, 255, 0, 255)),
            ((0.0, 170.0, 800.0, 180.0), srgb(147, 255, 0, 128)),
        ];

        Self {
            base_color: wgpu::Color::WHITE,
            rects: rects
                .into_iter()
                .map(|((x0, y0, x1, y1), color)| SceneRect {
                    min: Vec2::new(x0, y0),
                    max: Vec2::new(x1, y1),
                    color,
                })
                .collect(),
        }
    }

    /// Vertices needed to triangulate the scene, two triangles per rectangle.
    pub fn vertex_count(&self) -> usize {
        self.rects.len() * 6
    }
}

/// Converts an 8-bit sRGB color to linear floats, which is what the blending math and
/// the sRGB surface format expect.
fn srgb(r: u8, g: u8, b: u8, a: u8) -> [f32; 4] {
    fn channel(value: u8) -> f32 {
        let value = value as f32 / 255.0;
        if value <= 0.04045 {
            value / 12.92
        } else {
            ((value + 0.055) / 1.055).powf(2.4)
        }
    }

    // Alpha is linear already.
    [channel(r), channel(g), channel(b), a as f32 / 255.0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_endpoints_are_exact() {
        assert_eq!(srgb(0, 0, 0, 255), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(srgb(255, 255, 255, 255), [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn stripes_scene_is_well_formed() {
        let scene = Scene::stripes();
        assert_eq!(scene.vertex_count(), scene.rects.len() * 6);
        for rect in &scene.rects {
            assert!(rect.min.x < rect.max.x);
            assert!(rect.min.y < rect.max.y);
            for channel in rect.color {
                assert!((0.0..=1.0).contains(&channel));
            }
        }
    }
}
