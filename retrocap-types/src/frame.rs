use machine_vision_formats::{
    ImageBuffer, ImageBufferMutRef, ImageBufferRef, ImageData, ImageMutData, PixelFormat, Stride,
};

/// An owned image buffer with explicit row stride.
///
/// This is the frame type handed to the pipeline by the acquisition layer.
/// It implements the `machine-vision-formats` traits so the feature detector
/// can consume it (or any other stride-aware image) generically.
#[derive(Clone)]
pub struct VideoFrame<F> {
    width: u32,
    height: u32,
    stride: u32,
    data: Vec<u8>,
    fmt: std::marker::PhantomData<F>,
}

impl<F> VideoFrame<F>
where
    F: PixelFormat,
{
    /// Wrap an existing buffer. Returns `None` if the buffer is too small
    /// for the requested dimensions.
    pub fn new(width: u32, height: u32, stride: u32, data: Vec<u8>) -> Option<Self> {
        let fmt = machine_vision_formats::pixel_format::pixfmt::<F>().unwrap();
        let row_bytes = fmt.bits_per_pixel() as usize * width as usize / 8;
        if (stride as usize) < row_bytes {
            return None;
        }
        let min_size = stride as usize * (height as usize - 1) + row_bytes;
        if data.len() < min_size {
            return None;
        }
        Some(Self {
            width,
            height,
            stride,
            data,
            fmt: std::marker::PhantomData,
        })
    }

    /// Allocate a zero-filled frame with minimal stride.
    pub fn zeros(width: u32, height: u32) -> Self {
        let fmt = machine_vision_formats::pixel_format::pixfmt::<F>().unwrap();
        let stride = fmt.bits_per_pixel() as u32 * width / 8;
        let data = vec![0u8; stride as usize * height as usize];
        Self {
            width,
            height,
            stride,
            data,
            fmt: std::marker::PhantomData,
        }
    }
}

impl<F> std::fmt::Debug for VideoFrame<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VideoFrame {{ {}x{} }}", self.width, self.height)
    }
}

impl<F> ImageData<F> for VideoFrame<F> {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn buffer_ref(&self) -> ImageBufferRef<'_, F> {
        ImageBufferRef::new(&self.data)
    }
    fn buffer(self) -> ImageBuffer<F> {
        ImageBuffer::new(self.data)
    }
}

impl<F> ImageMutData<F> for VideoFrame<F> {
    fn buffer_mut_ref(&mut self) -> ImageBufferMutRef<'_, F> {
        ImageBufferMutRef::new(&mut self.data)
    }
}

impl<F> Stride for VideoFrame<F> {
    fn stride(&self) -> usize {
        self.stride as usize
    }
}

impl<F> From<VideoFrame<F>> for Vec<u8> {
    fn from(orig: VideoFrame<F>) -> Vec<u8> {
        orig.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machine_vision_formats::pixel_format::Mono8;

    #[test]
    fn buffer_size_is_validated() {
        assert!(VideoFrame::<Mono8>::new(4, 4, 4, vec![0u8; 16]).is_some());
        assert!(VideoFrame::<Mono8>::new(4, 4, 4, vec![0u8; 10]).is_none());
        assert!(VideoFrame::<Mono8>::new(4, 4, 2, vec![0u8; 16]).is_none());
    }

    #[test]
    fn zeros_has_minimal_stride() {
        let frame = VideoFrame::<Mono8>::zeros(5, 3);
        assert_eq!(frame.stride(), 5);
        assert_eq!(frame.image_data().len(), 15);
    }
}
