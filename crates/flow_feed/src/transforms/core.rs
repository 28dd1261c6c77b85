use anyhow::{Context, Result};
use std::marker::PhantomData;

/// A single owned-in, owned-out processing step.
///
/// Image loading is assembled from these steps: read the file, resize it, convert
/// it into a [`Raster`](crate::raster::Raster). Steps are joined with `.then(...)`
/// into a [`Chain`], which is inlined at compile time and reports which step
/// failed.
pub trait Transform<I, O>: Send + Sync {
    fn apply(&self, input: I) -> Result<O>;

    #[inline]
    fn then<T, M>(self, next: T) -> Chain<Self, T, O>
    where
        Self: Sized,
        T: Transform<O, M>,
        O: Send,
        M: Send,
    {
        Chain {
            first: self,
            second: next,
            _marker: PhantomData,
        }
    }
}

/// Two transforms run back to back (`A` -> `B`); `M` is the intermediate type.
#[derive(Debug, Clone)]
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _marker: PhantomData<fn() -> M>,
}

impl<A, B, M> Chain<A, B, M> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _marker: PhantomData,
        }
    }
}

impl<I, M, O, A, B> Transform<I, O> for Chain<A, B, M>
where
    A: Transform<I, M>,
    B: Transform<M, O>,
    M: Send,
{
    fn apply(&self, input: I) -> Result<O> {
        let mid = self
            .first
            .apply(input)
            .with_context(|| format!("{} failed", short_type_name::<A>()))?;
        self.second
            .apply(mid)
            .with_context(|| format!("{} failed", short_type_name::<B>()))
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
