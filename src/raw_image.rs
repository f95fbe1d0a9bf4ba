use crate::error::J2cError;

/// Interleaved 8-bit pixel buffer owned by the caller.
///
/// Decoding resizes it to the produced dimensions; encoding reads it as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawImage {
    width: u32,
    height: u32,
    components: u8,
    data: Vec<u8>,
}

impl RawImage {
    /// A zero-filled image.
    pub fn new(width: u32, height: u32, components: u8) -> Self {
        let mut image = Self::default();
        image.resize(width, height, components);
        image
    }

    pub fn from_data(
        width: u32,
        height: u32,
        components: u8,
        data: Vec<u8>,
    ) -> Result<Self, J2cError> {
        if data.len() != Self::buffer_len(width, height, components) {
            return Err(J2cError::InvalidArgument(
                "pixel buffer length does not match width * height * components",
            ));
        }
        Ok(Self {
            width,
            height,
            components,
            data,
        })
    }

    fn buffer_len(width: u32, height: u32, components: u8) -> usize {
        width as usize * height as usize * components as usize
    }

    /// Reshapes the buffer. Existing bytes are kept only when the size does not change.
    pub fn resize(&mut self, width: u32, height: u32, components: u8) {
        let len = Self::buffer_len(width, height, components);
        if len != self.data.len() {
            self.data.clear();
            self.data.resize(len, 0);
        }
        self.width = width;
        self.height = height;
        self.components = components;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn components(&self) -> u8 {
        self.components
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32, component: u8) -> Option<u8> {
        if x >= self.width || y >= self.height || component >= self.components {
            return None;
        }
        let index = (y as usize * self.width as usize + x as usize) * self.components as usize
            + component as usize;
        self.data.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_data_checks_length() {
        assert!(RawImage::from_data(2, 2, 3, vec![0; 12]).is_ok());
        assert!(RawImage::from_data(2, 2, 3, vec![0; 11]).is_err());
    }

    #[test]
    fn test_pixel_addressing() {
        let data = (0..24).collect();
        let image = RawImage::from_data(4, 2, 3, data).unwrap();
        assert_eq!(image.pixel(0, 0, 0), Some(0));
        assert_eq!(image.pixel(1, 0, 2), Some(5));
        assert_eq!(image.pixel(3, 1, 2), Some(23));
        assert_eq!(image.pixel(4, 0, 0), None);
        assert_eq!(image.pixel(0, 0, 3), None);
    }

    #[test]
    fn test_resize() {
        let mut image = RawImage::new(4, 4, 1);
        image.data_mut()[0] = 9;
        image.resize(2, 8, 1);
        assert_eq!(image.data()[0], 9);
        image.resize(2, 2, 1);
        assert_eq!((image.width(), image.height()), (2, 2));
        assert_eq!(image.data(), &[0; 4]);
    }
}
