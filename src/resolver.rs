//! The four-argument operation shape that recorders and connections wrap.

use std::{future::Future, marker::PhantomData};

use futures::future::BoxFuture;

/// Static facts about the field being resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveInfo {
    /// Declared operation name, e.g. `"createTodo"`.
    pub field_name: String,
}

impl ResolveInfo {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
        }
    }
}

/// One invocation: `(parent, args, context, info)`.
#[derive(Debug, Clone)]
pub struct Call<P, A, C> {
    pub parent: P,
    pub args: A,
    pub context: C,
    pub info: ResolveInfo,
}

impl<P, A, C> Call<P, A, C> {
    pub fn new(parent: P, args: A, context: C, info: ResolveInfo) -> Self {
        Self {
            parent,
            args,
            context,
            info,
        }
    }
}

/// An asynchronous operation over [`Call`].
///
/// Wrappers in this crate implement the trait themselves, so a recorded
/// resolver can be wrapped again.
pub trait Resolver<P, A, C>: Send + Sync {
    type Output: Send;
    type Error;

    fn call(&self, call: Call<P, A, C>) -> BoxFuture<'_, Result<Self::Output, Self::Error>>;
}

/// Adapter returned by [`resolver_fn`].
pub struct ResolverFn<F, P, A, C> {
    f: F,
    _call: PhantomData<fn(P, A, C)>,
}

/// Turns an async closure into a [`Resolver`].
///
/// ```
/// use node_version::resolver::{Call, ResolveInfo, Resolver, resolver_fn};
///
/// # tokio_test_block(async {
/// let double = resolver_fn(|call: Call<(), i64, ()>| async move {
///     Ok::<_, std::convert::Infallible>(call.args * 2)
/// });
/// let out = double.call(Call::new((), 21, (), ResolveInfo::new("double"))).await;
/// assert_eq!(out.ok(), Some(42));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub fn resolver_fn<F, Fut, P, A, C, N, E>(f: F) -> ResolverFn<F, P, A, C>
where
    F: Fn(Call<P, A, C>) -> Fut,
    Fut: Future<Output = Result<N, E>>,
{
    ResolverFn {
        f,
        _call: PhantomData,
    }
}

impl<F, Fut, P, A, C, N, E> Resolver<P, A, C> for ResolverFn<F, P, A, C>
where
    F: Fn(Call<P, A, C>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<N, E>> + Send + 'static,
    N: Send,
{
    type Output = N;
    type Error = E;

    fn call(&self, call: Call<P, A, C>) -> BoxFuture<'_, Result<N, E>> {
        Box::pin((self.f)(call))
    }
}
