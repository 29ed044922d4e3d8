//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Every pluggable implementation (storage backend, payment gateway,
/// production gateway) exposes a `Registry` type declaring the name used in
/// configuration files and the factory that builds it.
pub trait ImplementationRegistry {
	/// Name used in configuration, e.g. "memory" for
	/// `[storage.implementations.memory]`.
	const NAME: &'static str;

	/// Factory function type this implementation provides.
	type Factory;

	/// Returns the factory function for this implementation.
	fn factory() -> Self::Factory;
}
