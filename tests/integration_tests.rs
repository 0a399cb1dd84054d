use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use hotend_cache::{
	Cache, CacheBuilder, CacheController, CacheError, CacheKey, CacheRegistry, Controller, Entry, TrimKind,
	TrimSchedule, cache_key,
};

#[derive(Debug, PartialEq)]
struct Document {
	id: u64,
	body: String,
}

/// Controller that counts creations and refreshes.
#[derive(Default)]
struct Documents {
	created: AtomicUsize,
	refreshed: AtomicUsize,
	keep_all: bool,
}

impl Controller<Document> for Documents {
	fn can_value_be_trimmed(&self, _key: &CacheKey, _value: &Arc<Document>) -> bool {
		!self.keep_all
	}

	fn create_new_object(&self, key: &CacheKey) -> Option<Document> {
		let id = *key.key_at_as::<u64>(0).ok()??;
		self.created.fetch_add(1, Ordering::SeqCst);
		Some(Document {
			id,
			body: format!("document {id}"),
		})
	}

	fn on_need_refresh(&self, _key: &CacheKey, entry: &Entry<Document>) {
		self.refreshed.fetch_add(1, Ordering::SeqCst);
		if let Some(current) = entry.value() {
			entry.refresh(Arc::new(Document {
				id: current.id,
				body: format!("{} (refreshed)", current.body),
			}));
		}
	}
}

fn documents(controller: Arc<Documents>) -> CacheBuilder<Document> {
	CacheBuilder::with_controller(controller).name("documents").background_maintenance(false)
}

#[test]
fn test_auto_create_runs_once() {
	let controller = Arc::new(Documents::default());
	let cache = documents(Arc::clone(&controller)).build();
	let key = CacheKey::single(7u64);

	let first = cache.get(&key).unwrap();
	let second = cache.get(&key).unwrap();

	assert_eq!(first.body, "document 7");
	assert!(Arc::ptr_eq(&first, &second));
	assert_eq!(controller.created.load(Ordering::SeqCst), 1);
}

#[test]
fn test_miss_without_auto_create() {
	let controller = Arc::new(Documents::default());
	let cache = documents(Arc::clone(&controller)).build();

	assert_eq!(cache.get_with(&CacheKey::single(1u64), false).unwrap(), None);
	assert_eq!(controller.created.load(Ordering::SeqCst), 0);
	assert!(cache.is_empty());
}

#[test]
fn test_controller_without_value_is_an_error() {
	let cache = documents(Arc::new(Documents::default())).build();
	let key = cache_key!["not", "numeric"];

	match cache.get(&key) {
		Err(CacheError::ControllerContractViolation { cache, key }) => {
			assert_eq!(cache, "documents");
			assert_eq!(key, "[\"not\", \"numeric\"]");
		}
		other => panic!("unexpected result: {other:?}"),
	}
	assert!(!cache.contains(&key));
}

#[test]
fn test_put_if_absent() {
	let cache = documents(Arc::new(Documents::default())).build();
	let key = CacheKey::single(1u64);

	let first = Document {
		id: 1,
		body: "first".into(),
	};
	let second = Document {
		id: 1,
		body: "second".into(),
	};

	assert!(cache.put_if_absent(key.clone(), first).is_none());
	let resident = cache.put_if_absent(key.clone(), second).unwrap();
	assert_eq!(resident.body, "first");
	assert_eq!(cache.get(&key).unwrap().body, "first");
	assert_eq!(cache.len(), 1);
}

#[test]
fn test_reclaimed_weak_record_is_recreated() {
	let controller = Arc::new(Documents::default());
	let cache = documents(Arc::clone(&controller)).build();
	let key = CacheKey::single(3u64);

	let owned = Arc::new(Document {
		id: 3,
		body: "owned elsewhere".into(),
	});
	assert!(cache.put_weak_if_absent(key.clone(), &owned).is_none());
	assert_eq!(cache.get(&key).unwrap().body, "owned elsewhere");
	assert_eq!(controller.created.load(Ordering::SeqCst), 0);

	drop(owned);
	let recreated = cache.get(&key).unwrap();
	assert_eq!(recreated.body, "document 3");
	assert_eq!(controller.created.load(Ordering::SeqCst), 1);
}

#[test]
fn test_weak_record_does_not_block_put_if_absent() {
	let cache = documents(Arc::new(Documents::default())).build();
	let key = CacheKey::single(4u64);
	let owned = Arc::new(Document {
		id: 4,
		body: "gone".into(),
	});
	cache.put_weak_if_absent(key.clone(), &owned);
	drop(owned);

	let replacement = Document {
		id: 4,
		body: "replacement".into(),
	};
	assert!(cache.put_if_absent(key.clone(), replacement).is_none());
	assert_eq!(cache.get(&key).unwrap().body, "replacement");
}

#[test]
fn test_hard_trim_keeps_floor() {
	let cache = documents(Arc::new(Documents::default())).capacity(256).min_hard_size(64).build();
	for id in 0..100u64 {
		cache.get(&CacheKey::single(id)).unwrap();
	}

	let report = cache.trim_hard();

	assert_eq!(report.kind, TrimKind::Hard);
	assert!(cache.len() >= 64);
	assert_eq!(cache.len(), 64);
	assert_eq!(report.trimmed(), 36);
}

#[test]
fn test_hard_trim_veto_keeps_everything() {
	let controller = Arc::new(Documents {
		keep_all: true,
		..Documents::default()
	});
	let cache = documents(controller).capacity(256).min_hard_size(0).build();
	for id in 0..10u64 {
		cache.get(&CacheKey::single(id)).unwrap();
	}

	let report = cache.trim_hard();
	assert_eq!(report.vetoed, 10);
	assert_eq!(cache.len(), 10);
}

#[test]
fn test_refresh_on_touch() {
	let controller = Arc::new(Documents::default());
	let cache = documents(Arc::clone(&controller)).expire_time(Duration::from_millis(200)).build();
	let key = CacheKey::single(9u64);

	assert_eq!(cache.get(&key).unwrap().body, "document 9");
	thread::sleep(Duration::from_millis(250));

	let refreshed = cache.get(&key).unwrap();
	assert_eq!(refreshed.body, "document 9 (refreshed)");
	assert_eq!(controller.refreshed.load(Ordering::SeqCst), 1);

	// Fresh again right after the refresh.
	cache.get(&key).unwrap();
	assert_eq!(controller.refreshed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_background_maintenance_trims() {
	let schedule = TrimSchedule {
		hard_interval: Duration::from_millis(10),
		weak_interval: Duration::from_millis(10),
		weak_max_interval: Duration::from_millis(20),
		tick: Duration::from_millis(5),
		..TrimSchedule::default()
	};
	let cache = CacheBuilder::with_controller(Arc::new(Documents::default()) as Arc<dyn Controller<Document>>)
		.min_hard_size(2)
		.schedule(schedule)
		.build();
	for id in 0..10u64 {
		cache.get(&CacheKey::single(id)).unwrap();
	}

	let mut trimmed = false;
	for _ in 0..200 {
		if cache.len() == 2 {
			trimmed = true;
			break;
		}
		thread::sleep(Duration::from_millis(10));
	}
	assert!(trimmed, "housekeeper did not trim, len = {}", cache.len());
	cache.release_cache();
}

#[test]
fn test_release_stops_background_work() {
	let schedule = TrimSchedule {
		hard_interval: Duration::ZERO,
		tick: Duration::from_millis(1),
		..TrimSchedule::default()
	};
	let cache = CacheBuilder::new(CacheController::new(|_: &CacheKey| Some(0u8)))
		.min_hard_size(0)
		.schedule(schedule)
		.build();

	cache.release_cache();
	assert!(!cache.has_housekeeper());

	for n in 0..5u8 {
		cache.put(CacheKey::single(n), n);
	}
	thread::sleep(Duration::from_millis(30));
	assert_eq!(cache.len(), 5);
}

#[test]
fn test_run_maintenance_follows_schedule() {
	let schedule = TrimSchedule {
		hard_interval: Duration::from_secs(3600),
		weak_interval: Duration::from_secs(3600),
		weak_max_interval: Duration::from_secs(3600),
		..TrimSchedule::default()
	};
	let cache = documents(Arc::new(Documents::default())).schedule(schedule).build();
	cache.get(&CacheKey::single(1u64)).unwrap();

	assert!(cache.run_maintenance().is_empty());

	let zero = TrimSchedule {
		hard_interval: Duration::ZERO,
		weak_interval: Duration::ZERO,
		weak_max_interval: Duration::ZERO,
		..TrimSchedule::default()
	};
	let cache = documents(Arc::new(Documents::default())).schedule(zero).build();
	let kinds: Vec<_> = cache.run_maintenance().into_iter().map(|report| report.kind).collect();
	assert_eq!(kinds, vec![TrimKind::Hard, TrimKind::Weak]);
}

#[test]
fn test_growth_up_to_max_capacity() {
	let controller = Arc::new(Documents {
		keep_all: true,
		..Documents::default()
	});
	let cache = documents(controller).capacity(8).max_capacity(12).build();

	for id in 0..20u64 {
		cache.get(&CacheKey::single(id)).unwrap();
	}

	assert_eq!(cache.capacity(), 12);
	assert_eq!(cache.len(), 12);
}

#[test]
fn test_replace_at_capacity_keeps_residents() {
	let cache = documents(Arc::new(Documents::default())).capacity(3).build();
	for id in 0..3u64 {
		cache.get(&CacheKey::single(id)).unwrap();
	}

	let previous = cache.put(
		CacheKey::single(2u64),
		Document {
			id: 2,
			body: "edited".into(),
		},
	);
	assert_eq!(previous.unwrap().body, "document 2");
	for id in 0..3u64 {
		assert!(cache.contains(&CacheKey::single(id)), "document {id} was evicted");
	}
	assert_eq!(cache.metrics().evictions, 0);
	assert_eq!(cache.get(&CacheKey::single(2u64)).unwrap().body, "edited");
}

#[test]
fn test_replace_with_headroom_keeps_capacity() {
	let controller = Arc::new(Documents {
		keep_all: true,
		..Documents::default()
	});
	let cache = documents(controller).capacity(3).max_capacity(10).build();
	for id in 0..3u64 {
		cache.get(&CacheKey::single(id)).unwrap();
	}

	for round in 0..5 {
		cache.put(
			CacheKey::single(1u64),
			Document {
				id: 1,
				body: format!("revision {round}"),
			},
		);
	}
	assert_eq!(cache.capacity(), 3);
	assert_eq!(cache.len(), 3);
}

#[test]
fn test_concurrent_gets_share_one_value() {
	let cache: Arc<Cache<Document>> = Arc::new(documents(Arc::new(Documents::default())).build());
	let barrier = Arc::new(Barrier::new(8));
	let key = CacheKey::single(42u64);

	let handles: Vec<_> = (0..8)
		.map(|_| {
			let cache = Arc::clone(&cache);
			let barrier = Arc::clone(&barrier);
			let key = key.clone();
			thread::spawn(move || {
				barrier.wait();
				cache.get(&key).unwrap()
			})
		})
		.collect();

	let values: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
	let resident = cache.get(&key).unwrap();
	assert!(values.iter().all(|value| Arc::ptr_eq(value, &resident)));
	assert_eq!(cache.len(), 1);
}

#[test]
fn test_global_registry() {
	#[derive(Debug)]
	struct Setting(&'static str);

	let registry = CacheRegistry::global();
	let cache = registry.build_cache_for(CacheController::new(|_: &CacheKey| Some(Setting("default"))));
	let again = registry.get_cache_for::<Setting>().unwrap();

	assert!(Arc::ptr_eq(&cache, &again));
	assert!(registry.cache_names().iter().any(|name| name.ends_with("Setting")));

	registry.remove_cache::<Setting>().unwrap();
	assert!(registry.get_cache_for::<Setting>().is_none());
}
