//! Tensor backend picked at compile time: `cuda`, then `wgpu`, else NdArray.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        pub type SelectedBackend = burn::backend::Cuda;
        pub type SelectedDevice = burn::backend::cuda::CudaDevice;
        pub const BACKEND_NAME: &str = "CUDA (NVIDIA GPU)";
    } else if #[cfg(feature = "wgpu")] {
        pub type SelectedBackend = burn::backend::Wgpu;
        pub type SelectedDevice = burn::backend::wgpu::WgpuDevice;
        pub const BACKEND_NAME: &str = "WGPU (GPU)";
    } else {
        pub type SelectedBackend = burn::backend::NdArray;
        pub type SelectedDevice = burn::backend::ndarray::NdArrayDevice;
        pub const BACKEND_NAME: &str = "NdArray (CPU)";
    }
}

/// Default device of the selected backend.
pub fn create_device() -> SelectedDevice {
    SelectedDevice::default()
}
