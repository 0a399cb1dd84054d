use std::sync::Arc;
use std::time::Duration;

use hotend_cache::{CacheBuilder, CacheKey, CacheRegistry, Controller, Entry, TrimSchedule, cache_key};
use tracing_subscriber::EnvFilter;

/// Decoded image held by the cache.
#[derive(Debug)]
struct Image {
	path: String,
	scale: u32,
	pixels: Vec<u8>,
}

/// Decodes images on demand and keeps pinned ones resident.
struct Decoder {
	pinned: &'static [&'static str],
}

impl Controller<Image> for Decoder {
	fn can_value_be_trimmed(&self, key: &CacheKey, _value: &Arc<Image>) -> bool {
		match key.key_at_as::<&str>(0) {
			Ok(Some(path)) => !self.pinned.contains(path),
			_ => true,
		}
	}

	fn create_new_object(&self, key: &CacheKey) -> Option<Image> {
		let path = key.key_at_as::<&str>(0).ok()??;
		let scale = *key.key_at_as::<u32>(1).ok()??;
		Some(Image {
			path: path.to_string(),
			scale,
			pixels: vec![0; (scale * scale) as usize],
		})
	}

	fn on_need_refresh(&self, key: &CacheKey, entry: &Entry<Image>) {
		tracing::info!(?key, age = ?entry.age(), "re-decoding stale image");
		if let Some(image) = self.create_new_object(key) {
			entry.refresh(Arc::new(image));
		}
	}
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hotend_cache=debug,info")))
		.init();

	let images = CacheRegistry::global().build_cache(
		CacheBuilder::new(Decoder {
			pinned: &["logo.png"],
		})
		.name("images")
		.capacity(64 * 64 * 4)
		.max_capacity(64 * 64 * 8)
		.weigher(|_, image: &Image| image.pixels.len())
		.min_hard_size(1)
		.expire_time(Duration::from_millis(200))
		.schedule(TrimSchedule {
			hard_interval: Duration::from_millis(100),
			weak_interval: Duration::from_millis(100),
			weak_max_interval: Duration::from_millis(300),
			tick: Duration::from_millis(50),
			..TrimSchedule::default()
		}),
	);

	let logo = images.get(&cache_key!["logo.png", 64u32]).expect("logo decodes");
	for i in 0..12u32 {
		let path: &'static str = ["a.png", "b.png", "c.png"][i as usize % 3];
		let image = images.get(&cache_key![path, 16 + i]).expect("image decodes");
		tracing::info!(path = %image.path, scale = image.scale, "served");
	}

	// A thumbnail owned by the caller, tracked weakly.
	let preview = Arc::new(Image {
		path: "preview.png".into(),
		scale: 8,
		pixels: vec![0; 64],
	});
	images.put_weak_if_absent(cache_key!["preview.png", 8u32], &preview);

	std::thread::sleep(Duration::from_millis(400));
	drop(preview);
	std::thread::sleep(Duration::from_millis(400));

	let metrics = images.metrics();
	println!("logo still shared: {}", images.contains(&cache_key!["logo.png", 64u32]));
	println!("records: {}, size: {}/{}", metrics.entry_count, metrics.current_size, metrics.capacity);
	println!("hit rate: {:.1}%", metrics.hit_rate() * 100.0);
	println!("evictions: {}, demotions: {}, refreshes: {}", metrics.evictions, metrics.demotions, metrics.refreshes);

	drop(logo);
	CacheRegistry::global().remove_cache::<Image>();
}
