//! Registry trait for self-registering backend implementations.

/// Base trait for implementation registries.
///
/// Each pluggable backend module (currently the storage backends) provides a
/// `Registry` struct implementing this trait, declaring the name used in
/// configuration and the factory that builds it.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// e.g. "memory" for `[storage.implementations.memory]`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
