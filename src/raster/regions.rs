//! Connected-component measurement over label planes.

use ndarray::ArrayView2;

/// One 8-connected component of a label plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// The plane label the component belongs to.
    pub label: u32,
    /// Pixel count.
    pub area: usize,
    /// Mass centroid, x (column) coordinate.
    pub centroid_x: f64,
    /// Mass centroid, y (row) coordinate.
    pub centroid_y: f64,
}

/// Find every 8-connected component of every nonzero label in a plane.
///
/// A well-formed plane yields exactly one region per label; callers that
/// depend on that (reconciliation) check the per-label count themselves.
pub fn regions(plane: ArrayView2<'_, u32>) -> Vec<Region> {
    let (height, width) = plane.dim();
    let mut visited = vec![false; height * width];
    let mut out = Vec::new();

    for y0 in 0..height {
        for x0 in 0..width {
            let label = plane[[y0, x0]];
            if label == 0 || visited[y0 * width + x0] {
                continue;
            }
            // flood fill one component
            let mut stack = vec![(y0, x0)];
            visited[y0 * width + x0] = true;
            let mut area = 0usize;
            let mut sum_y = 0f64;
            let mut sum_x = 0f64;
            while let Some((y, x)) = stack.pop() {
                area += 1;
                sum_y += y as f64;
                sum_x += x as f64;
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dy == 0 && dx == 0 {
                            continue;
                        }
                        let ny = y as i64 + dy;
                        let nx = x as i64 + dx;
                        if ny < 0 || nx < 0 || ny >= height as i64 || nx >= width as i64 {
                            continue;
                        }
                        let (ny, nx) = (ny as usize, nx as usize);
                        if !visited[ny * width + nx] && plane[[ny, nx]] == label {
                            visited[ny * width + nx] = true;
                            stack.push((ny, nx));
                        }
                    }
                }
            }
            out.push(Region {
                label,
                area,
                centroid_x: sum_x / area as f64,
                centroid_y: sum_y / area as f64,
            });
        }
    }
    out
}

/// Mass centroid `(x, y)` over every pixel of one label, ignoring
/// connectivity. `None` if the label is absent from the plane.
pub fn label_centroid(plane: ArrayView2<'_, u32>, label: u32) -> Option<(f64, f64)> {
    let mut area = 0usize;
    let mut sum_y = 0f64;
    let mut sum_x = 0f64;
    for ((y, x), &v) in plane.indexed_iter() {
        if v == label {
            area += 1;
            sum_y += y as f64;
            sum_x += x as f64;
        }
    }
    if area == 0 {
        None
    } else {
        Some((sum_x / area as f64, sum_y / area as f64))
    }
}
