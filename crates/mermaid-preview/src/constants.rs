use std::time::Duration;

pub const ZOOM_DEFAULT_SCALE: f64 = 1.0;
pub const ZOOM_MIN_SCALE: f64 = 0.5;
pub const ZOOM_MAX_SCALE: f64 = 1.5;
pub const ZOOM_SCALE_INTERVAL: f64 = 0.1;

/// Quiet period the renderer waits for before pushing an incremental update.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// How long a `takeImage` may stay unanswered before the view reports a failure.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_BACKGROUND_COLOR: &str = "white";

/// Element id of the JSON data island carried by the surface bootstrap document.
pub const BOOTSTRAP_DATA_ID: &str = "preview-bootstrap";

pub const MESSAGE_GENERATE_IMAGE_SUCCESS: &str = "Image generated successfully";
pub const MESSAGE_GENERATE_IMAGE_FAILURE: &str = "Failed to generate image";
pub const MESSAGE_COPY_IMAGE_SUCCESS: &str = "Image copied to clipboard";
