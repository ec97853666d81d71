//! The `Meta` interface and its engine.
//!
//! `MetaEngine` runs every mutating operation as one read-write transaction
//! (retried on conflicts), then performs the recorded post-commit work: lock
//! waiter wakeups, event dispatch and content reclamation. Read operations
//! use a read-only transaction.

use std::sync::Arc;

use async_trait::async_trait;
use slicefs_kv::KvEngine;
use slicefs_types::{make_error, make_error_msg, LockOwner, MetaCode, Result, StatusCode};

use crate::config::MetaConfig;
use crate::context::Context;
use crate::counters::{Counter, IdAllocator};
use crate::event::{EventDispatcher, MsgCallback};
use crate::lock::{flock, plock, Waiters};
use crate::meta_store::{MetaStore, PostCommit};
use crate::ops;
use crate::ops::create::CreateArgs;
use crate::ops::rename::RenameArgs;
use crate::reclaim::Reclaimer;
use crate::retry::{with_rw_txn, Backoff};
use crate::background::BackgroundRunner;
use crate::chunk::SliceRecord;
use crate::types::{
    Attr, Entry, Ino, InodeType, LockInfo, Slice, StatFs, F_UNLCK, LOCK_GET, LOCK_INT, LOCK_SET,
    LOCK_TRY, MODE_MASK_W,
};

/// Metadata operations of the filesystem.
///
/// Every call carries the caller's [`Context`]. Errors map to POSIX errno
/// through [`slicefs_types::Status::errno`].
#[async_trait]
pub trait Meta: Send + Sync {
    /// Creates the root directory unless the filesystem exists, then closes
    /// handler registration.
    async fn init(&self) -> Result<()>;

    /// Attaches to an existing filesystem and closes handler registration.
    async fn load(&self) -> Result<()>;

    /// Registers a handler for messages of type `mtype`. Only allowed before
    /// `init`/`load`.
    fn on_msg(&self, mtype: u32, cb: MsgCallback) -> Result<()>;

    async fn stat_fs(&self, ctx: &Context) -> Result<StatFs>;

    async fn access(&self, ctx: &Context, ino: Ino, mask: u8) -> Result<()>;

    async fn lookup(&self, ctx: &Context, parent: Ino, name: &[u8]) -> Result<(Ino, Attr)>;

    async fn get_attr(&self, ctx: &Context, ino: Ino) -> Result<Attr>;

    /// Applies the fields of `attr` selected by the `SET_ATTR_*` bits in `set`.
    async fn set_attr(
        &self,
        ctx: &Context,
        ino: Ino,
        set: u16,
        sgid_clear_mode: u8,
        attr: &Attr,
    ) -> Result<Attr>;

    async fn truncate(&self, ctx: &Context, ino: Ino, flags: u8, length: u64) -> Result<Attr>;

    async fn fallocate(&self, ctx: &Context, ino: Ino, mode: u8, off: u64, size: u64) -> Result<()>;

    async fn read_link(&self, ctx: &Context, ino: Ino) -> Result<Vec<u8>>;

    async fn symlink(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &[u8],
        target: &[u8],
    ) -> Result<(Ino, Attr)>;

    #[allow(clippy::too_many_arguments)]
    async fn mknod(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &[u8],
        typ: InodeType,
        mode: u16,
        cumask: u16,
        rdev: u32,
    ) -> Result<(Ino, Attr)>;

    async fn mkdir(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &[u8],
        mode: u16,
        cumask: u16,
        copysgid: bool,
    ) -> Result<(Ino, Attr)>;

    async fn unlink(&self, ctx: &Context, parent: Ino, name: &[u8]) -> Result<()>;

    async fn rmdir(&self, ctx: &Context, parent: Ino, name: &[u8]) -> Result<()>;

    async fn rename(
        &self,
        ctx: &Context,
        parent_src: Ino,
        name_src: &[u8],
        parent_dst: Ino,
        name_dst: &[u8],
        flags: u32,
    ) -> Result<(Ino, Attr)>;

    async fn link(&self, ctx: &Context, ino: Ino, parent: Ino, name: &[u8]) -> Result<Attr>;

    /// All entries of `ino`, `.` and `..` first.
    async fn readdir(&self, ctx: &Context, ino: Ino, want_attr: bool) -> Result<Vec<Entry>>;

    /// One page of entries; resume with the name of the last stored entry
    /// returned while the flag says more remain.
    async fn readdir_page(
        &self,
        ctx: &Context,
        ino: Ino,
        after: Option<&[u8]>,
        limit: usize,
        want_attr: bool,
    ) -> Result<(Vec<Entry>, bool)>;

    /// Creates and opens a regular file.
    async fn create(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &[u8],
        mode: u16,
        cumask: u16,
        flags: i32,
    ) -> Result<(Ino, Attr)>;

    async fn open(&self, ctx: &Context, ino: Ino, flags: i32) -> Result<Attr>;

    async fn close(&self, ctx: &Context, ino: Ino) -> Result<()>;

    /// Flattened slices of chunk `indx`.
    async fn read(&self, ctx: &Context, ino: Ino, indx: u32) -> Result<Vec<Slice>>;

    /// A fresh content id for a write into chunk `indx` at `offset`.
    async fn new_chunk(&self, ctx: &Context, ino: Ino, indx: u32, offset: u32) -> Result<u64>;

    async fn write(&self, ctx: &Context, ino: Ino, indx: u32, pos: u32, slice: Slice) -> Result<()>;

    async fn get_xattr(&self, ctx: &Context, ino: Ino, name: &[u8]) -> Result<Vec<u8>>;

    async fn list_xattr(&self, ctx: &Context, ino: Ino) -> Result<Vec<u8>>;

    async fn set_xattr(
        &self,
        ctx: &Context,
        ino: Ino,
        name: &[u8],
        value: &[u8],
        flags: u32,
    ) -> Result<()>;

    async fn remove_xattr(&self, ctx: &Context, ino: Ino, name: &[u8]) -> Result<()>;

    async fn flock(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: LockOwner,
        ltype: u32,
        block: bool,
    ) -> Result<()>;

    async fn getlk(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: LockOwner,
        ltype: u32,
        start: u64,
        end: u64,
    ) -> Result<LockInfo>;

    #[allow(clippy::too_many_arguments)]
    async fn setlk(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: LockOwner,
        block: bool,
        ltype: u32,
        start: u64,
        end: u64,
        pid: u32,
    ) -> Result<()>;

    /// Command form of the POSIX lock calls (`LOCK_GET`, `LOCK_SET`,
    /// `LOCK_TRY`, `LOCK_INT`). `LOCK_GET` reports the first conflicting
    /// lock; the other commands echo the request.
    #[allow(clippy::too_many_arguments)]
    async fn posix_lock(
        &self,
        ctx: &Context,
        cmd: u32,
        ino: Ino,
        owner: LockOwner,
        ltype: u32,
        start: u64,
        end: u64,
        pid: u32,
    ) -> Result<LockInfo>;
}

#[derive(Debug, Clone, Copy)]
enum LockRequest {
    Flock { ltype: u32 },
    Plock { ltype: u32, start: u64, end: u64, pid: u32 },
}

impl LockRequest {
    fn is_unlock(&self) -> bool {
        match *self {
            LockRequest::Flock { ltype } | LockRequest::Plock { ltype, .. } => ltype == F_UNLCK,
        }
    }
}

pub struct MetaEngine<E: KvEngine> {
    engine: Arc<E>,
    store: Arc<MetaStore>,
    events: Arc<EventDispatcher>,
    waiters: Waiters,
    inode_ids: IdAllocator,
    chunk_ids: IdAllocator,
    reclaimer: Reclaimer<E>,
}

impl<E: KvEngine> MetaEngine<E> {
    pub fn new(config: MetaConfig, engine: Arc<E>) -> Self {
        let events = Arc::new(EventDispatcher::new());
        let reclaimer = Reclaimer::new(engine.clone(), events.clone(), Arc::new(config.clone()));
        Self {
            inode_ids: IdAllocator::new(Counter::NextInode, config.inode_batch),
            chunk_ids: IdAllocator::new(Counter::NextChunk, config.chunk_batch),
            store: Arc::new(MetaStore::new(config)),
            engine,
            events,
            waiters: Waiters::new(),
            reclaimer,
        }
    }

    pub fn store(&self) -> &MetaStore {
        &self.store
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn reclaimer(&self) -> &Reclaimer<E> {
        &self.reclaimer
    }

    /// Starts the periodic reclamation sweep.
    pub fn spawn_background(&self, runner: &mut BackgroundRunner) {
        self.reclaimer.spawn_background(runner);
    }

    /// Raw slice history of chunk `indx`, in recording order.
    pub async fn read_history(&self, _ctx: &Context, ino: Ino, indx: u32) -> Result<Vec<SliceRecord>> {
        let txn = self.engine.create_readonly_transaction();
        ops::chunk_ops::read_history(&txn, ino, indx).await
    }

    fn backoff(&self) -> Backoff {
        Backoff::from_config(self.store.config())
    }

    fn check_readonly(&self) -> Result<()> {
        if self.store.config().readonly {
            return make_error_msg(StatusCode::READ_ONLY_MODE, "filesystem is mounted read-only");
        }
        Ok(())
    }

    async fn alloc_inode(&self) -> Result<Ino> {
        self.inode_ids.next(&*self.engine, self.backoff()).await
    }

    /// Post-commit work. The transaction stays committed whatever happens
    /// here; only a failed notification is reported to the caller.
    async fn finish(&self, post: PostCommit) -> Result<()> {
        if post.is_empty() {
            return Ok(());
        }
        for ino in &post.wake {
            self.waiters.wake(*ino);
        }
        let notified = self.events.dispatch_all(&post.messages);
        for ino in post.reclaim {
            if let Err(e) = self.reclaimer.reclaim_file(ino).await {
                tracing::warn!(ino, error = %e, "reclaim: left for background sweep");
            }
        }
        notified
    }

    /// With `open`, the handle on the new inode is registered before the
    /// transaction runs, so an unlink racing the commit already sees it open.
    async fn create_node(
        &self,
        ctx: &Context,
        args: CreateArgs<'_>,
        open: bool,
    ) -> Result<(Ino, Attr)> {
        self.check_readonly()?;
        let id = self.alloc_inode().await?;
        if open {
            self.store.add_open(id);
        }
        let created = with_rw_txn!(&*self.engine, self.backoff(), "mknod", |txn, _out| {
            ops::create::mknod(txn, &self.store, ctx, id, &args).await
        });
        let result = match created {
            Ok((created, post)) => self.finish(post).await.map(|_| created),
            Err(e) => Err(e),
        };
        if open && result.is_err() {
            self.store.release_open(id);
        }
        result
    }

    async fn try_lock_once(&self, ino: Ino, owner: LockOwner, req: LockRequest) -> Result<bool> {
        let (granted, post) = with_rw_txn!(&*self.engine, self.backoff(), "lock", |txn, out| {
            match req {
                LockRequest::Flock { ltype } => {
                    flock::try_flock(txn, &self.store, out, ino, owner, ltype).await
                }
                LockRequest::Plock { ltype, start, end, pid } => {
                    plock::try_setlk(txn, out, ino, owner, ltype, start, end, pid).await
                }
            }
        })?;
        self.finish(post).await?;
        Ok(granted)
    }

    /// Applies `req`, waiting for conflicting holders when `block` is set.
    ///
    /// A waiter re-checks after every local release on the inode and every
    /// `lock_recheck_interval`. Cancelling `ctx`, or `LOCK_INT` for a POSIX
    /// request, ends the wait with `Interrupted` and nothing granted.
    async fn acquire(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: LockOwner,
        req: LockRequest,
        block: bool,
    ) -> Result<()> {
        self.check_readonly()?;
        if !block || req.is_unlock() {
            return match self.try_lock_once(ino, owner, req).await? {
                true => Ok(()),
                false => make_error(MetaCode::WOULD_BLOCK),
            };
        }

        let interruptible = matches!(req, LockRequest::Plock { .. });
        let guard = self.waiters.register(ino, interruptible.then_some(owner));
        let recheck = self.store.config().lock_recheck_interval();
        loop {
            let notified = guard.notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.try_lock_once(ino, owner, req).await? {
                return Ok(());
            }
            tracing::debug!(ino, ?owner, ?req, "lock: waiting");
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(recheck) => {}
                _ = ctx.cancelled() => {
                    return make_error_msg(StatusCode::INTERRUPTED, "lock wait cancelled");
                }
                _ = guard.interrupted() => {
                    return make_error_msg(StatusCode::INTERRUPTED, "lock wait interrupted");
                }
            }
        }
    }
}

#[async_trait]
impl<E: KvEngine> Meta for MetaEngine<E> {
    async fn init(&self) -> Result<()> {
        self.check_readonly()?;
        let (created, _) = with_rw_txn!(&*self.engine, self.backoff(), "init", |txn, _out| {
            ops::init::init_fs(txn, &self.store).await
        })?;
        self.events.freeze();
        tracing::info!(created, sid = %self.store.sid(), "init: engine ready");
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        let txn = self.engine.create_readonly_transaction();
        ops::init::check_fs(&txn).await?;
        self.events.freeze();
        tracing::info!(sid = %self.store.sid(), "load: engine ready");
        Ok(())
    }

    fn on_msg(&self, mtype: u32, cb: MsgCallback) -> Result<()> {
        self.events.on_msg(mtype, cb)
    }

    async fn stat_fs(&self, _ctx: &Context) -> Result<StatFs> {
        let txn = self.engine.create_readonly_transaction();
        ops::stat_fs::stat_fs(&txn, &self.store).await
    }

    async fn access(&self, ctx: &Context, ino: Ino, mask: u8) -> Result<()> {
        if mask & MODE_MASK_W != 0 {
            self.check_readonly()?;
        }
        let txn = self.engine.create_readonly_transaction();
        ops::lookup::access(&txn, ctx, ino, mask).await
    }

    async fn lookup(&self, ctx: &Context, parent: Ino, name: &[u8]) -> Result<(Ino, Attr)> {
        let txn = self.engine.create_readonly_transaction();
        ops::lookup::lookup(&txn, &self.store, ctx, parent, name).await
    }

    async fn get_attr(&self, _ctx: &Context, ino: Ino) -> Result<Attr> {
        let txn = self.engine.create_readonly_transaction();
        ops::lookup::get_attr(&txn, ino).await
    }

    async fn set_attr(
        &self,
        ctx: &Context,
        ino: Ino,
        set: u16,
        sgid_clear_mode: u8,
        attr: &Attr,
    ) -> Result<Attr> {
        self.check_readonly()?;
        let (attr, post) = with_rw_txn!(&*self.engine, self.backoff(), "set_attr", |txn, out| {
            ops::set_attr::set_attr(txn, &self.store, ctx, out, ino, set, sgid_clear_mode, attr).await
        })?;
        self.finish(post).await?;
        Ok(attr)
    }

    async fn truncate(&self, ctx: &Context, ino: Ino, flags: u8, length: u64) -> Result<Attr> {
        self.check_readonly()?;
        let (attr, post) = with_rw_txn!(&*self.engine, self.backoff(), "truncate", |txn, out| {
            ops::truncate::truncate(txn, &self.store, ctx, out, ino, flags, length).await
        })?;
        self.finish(post).await?;
        Ok(attr)
    }

    async fn fallocate(&self, ctx: &Context, ino: Ino, mode: u8, off: u64, size: u64) -> Result<()> {
        self.check_readonly()?;
        let (_, post) = with_rw_txn!(&*self.engine, self.backoff(), "fallocate", |txn, out| {
            ops::truncate::fallocate(txn, &self.store, ctx, out, ino, mode, off, size).await
        })?;
        self.finish(post).await
    }

    async fn read_link(&self, _ctx: &Context, ino: Ino) -> Result<Vec<u8>> {
        let txn = self.engine.create_readonly_transaction();
        ops::lookup::read_link(&txn, ino).await
    }

    async fn symlink(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &[u8],
        target: &[u8],
    ) -> Result<(Ino, Attr)> {
        let mut args = CreateArgs::new(parent, name, InodeType::Symlink, 0o777);
        args.target = Some(target);
        self.create_node(ctx, args, false).await
    }

    async fn mknod(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &[u8],
        typ: InodeType,
        mode: u16,
        cumask: u16,
        rdev: u32,
    ) -> Result<(Ino, Attr)> {
        if matches!(typ, InodeType::Directory | InodeType::Symlink) {
            return make_error_msg(
                StatusCode::INVALID_ARG,
                format!("mknod cannot create {:?}", typ),
            );
        }
        let mut args = CreateArgs::new(parent, name, typ, mode);
        args.cumask = cumask;
        args.rdev = rdev;
        self.create_node(ctx, args, false).await
    }

    async fn mkdir(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &[u8],
        mode: u16,
        cumask: u16,
        copysgid: bool,
    ) -> Result<(Ino, Attr)> {
        let mut args = CreateArgs::new(parent, name, InodeType::Directory, mode);
        args.cumask = cumask;
        args.copysgid = copysgid;
        self.create_node(ctx, args, false).await
    }

    async fn unlink(&self, ctx: &Context, parent: Ino, name: &[u8]) -> Result<()> {
        self.check_readonly()?;
        let (_, post) = with_rw_txn!(&*self.engine, self.backoff(), "unlink", |txn, out| {
            ops::remove::unlink(txn, &self.store, ctx, out, parent, name).await
        })?;
        self.finish(post).await
    }

    async fn rmdir(&self, ctx: &Context, parent: Ino, name: &[u8]) -> Result<()> {
        self.check_readonly()?;
        let (_, post) = with_rw_txn!(&*self.engine, self.backoff(), "rmdir", |txn, out| {
            ops::remove::rmdir(txn, &self.store, ctx, out, parent, name).await
        })?;
        self.finish(post).await
    }

    async fn rename(
        &self,
        ctx: &Context,
        parent_src: Ino,
        name_src: &[u8],
        parent_dst: Ino,
        name_dst: &[u8],
        flags: u32,
    ) -> Result<(Ino, Attr)> {
        self.check_readonly()?;
        let args = RenameArgs {
            src_parent: parent_src,
            src_name: name_src,
            dst_parent: parent_dst,
            dst_name: name_dst,
            flags,
        };
        let (moved, post) = with_rw_txn!(&*self.engine, self.backoff(), "rename", |txn, out| {
            ops::rename::rename(txn, &self.store, ctx, out, &args).await
        })?;
        self.finish(post).await?;
        Ok(moved)
    }

    async fn link(&self, ctx: &Context, ino: Ino, parent: Ino, name: &[u8]) -> Result<Attr> {
        self.check_readonly()?;
        let (attr, _) = with_rw_txn!(&*self.engine, self.backoff(), "link", |txn, _out| {
            ops::create::link(txn, &self.store, ctx, ino, parent, name).await
        })?;
        Ok(attr)
    }

    async fn readdir(&self, ctx: &Context, ino: Ino, want_attr: bool) -> Result<Vec<Entry>> {
        let txn = self.engine.create_readonly_transaction();
        let limit = self.store.config().readdir_limit;
        let (mut entries, mut more) =
            ops::list::readdir_page(&txn, ctx, ino, None, limit, want_attr).await?;
        while more {
            let after = match entries.last() {
                Some(last) if last.name != b"." && last.name != b".." => last.name.clone(),
                _ => break,
            };
            let (page, rest) =
                ops::list::readdir_page(&txn, ctx, ino, Some(&after), limit, want_attr).await?;
            if page.is_empty() {
                break;
            }
            entries.extend(page);
            more = rest;
        }
        Ok(entries)
    }

    async fn readdir_page(
        &self,
        ctx: &Context,
        ino: Ino,
        after: Option<&[u8]>,
        limit: usize,
        want_attr: bool,
    ) -> Result<(Vec<Entry>, bool)> {
        let txn = self.engine.create_readonly_transaction();
        ops::list::readdir_page(&txn, ctx, ino, after, limit, want_attr).await
    }

    async fn create(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &[u8],
        mode: u16,
        cumask: u16,
        flags: i32,
    ) -> Result<(Ino, Attr)> {
        let mut args = CreateArgs::new(parent, name, InodeType::File, mode);
        args.cumask = cumask;
        let (ino, attr) = self.create_node(ctx, args, true).await?;
        tracing::debug!(ino, flags, "create: opened");
        Ok((ino, attr))
    }

    async fn open(&self, ctx: &Context, ino: Ino, flags: i32) -> Result<Attr> {
        if ops::open::access_mask(flags) & MODE_MASK_W != 0 {
            self.check_readonly()?;
        }
        self.store.add_open(ino);
        let txn = self.engine.create_readonly_transaction();
        match ops::open::check_open(&txn, ctx, ino, flags).await {
            Ok(attr) => Ok(attr),
            Err(e) => {
                self.store.release_open(ino);
                Err(e)
            }
        }
    }

    async fn close(&self, _ctx: &Context, ino: Ino) -> Result<()> {
        if !self.store.release_open(ino) {
            return Ok(());
        }
        let (_, post) = with_rw_txn!(&*self.engine, self.backoff(), "close", |txn, out| {
            ops::open::close_last(txn, &self.store, out, ino).await
        })?;
        self.finish(post).await
    }

    async fn read(&self, _ctx: &Context, ino: Ino, indx: u32) -> Result<Vec<Slice>> {
        let txn = self.engine.create_readonly_transaction();
        ops::chunk_ops::read(&txn, ino, indx).await
    }

    async fn new_chunk(&self, _ctx: &Context, ino: Ino, indx: u32, offset: u32) -> Result<u64> {
        self.check_readonly()?;
        let id = self.chunk_ids.next(&*self.engine, self.backoff()).await?;
        tracing::trace!(ino, indx, offset, chunkid = id, "new_chunk: allocated");
        Ok(id)
    }

    async fn write(&self, _ctx: &Context, ino: Ino, indx: u32, pos: u32, slice: Slice) -> Result<()> {
        self.check_readonly()?;
        let (_, post) = with_rw_txn!(&*self.engine, self.backoff(), "write", |txn, out| {
            ops::chunk_ops::write(txn, &self.store, out, ino, indx, pos, slice).await
        })?;
        self.finish(post).await
    }

    async fn get_xattr(&self, _ctx: &Context, ino: Ino, name: &[u8]) -> Result<Vec<u8>> {
        let txn = self.engine.create_readonly_transaction();
        ops::xattr_ops::get_xattr(&txn, ino, name).await
    }

    async fn list_xattr(&self, _ctx: &Context, ino: Ino) -> Result<Vec<u8>> {
        let txn = self.engine.create_readonly_transaction();
        ops::xattr_ops::list_xattr(&txn, ino).await
    }

    async fn set_xattr(
        &self,
        ctx: &Context,
        ino: Ino,
        name: &[u8],
        value: &[u8],
        flags: u32,
    ) -> Result<()> {
        self.check_readonly()?;
        with_rw_txn!(&*self.engine, self.backoff(), "set_xattr", |txn, _out| {
            ops::xattr_ops::set_xattr(txn, &self.store, ctx, ino, name, value, flags).await
        })?;
        Ok(())
    }

    async fn remove_xattr(&self, ctx: &Context, ino: Ino, name: &[u8]) -> Result<()> {
        self.check_readonly()?;
        with_rw_txn!(&*self.engine, self.backoff(), "remove_xattr", |txn, _out| {
            ops::xattr_ops::remove_xattr(txn, &self.store, ctx, ino, name).await
        })?;
        Ok(())
    }

    async fn flock(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: LockOwner,
        ltype: u32,
        block: bool,
    ) -> Result<()> {
        self.acquire(ctx, ino, owner, LockRequest::Flock { ltype }, block)
            .await
    }

    async fn getlk(
        &self,
        _ctx: &Context,
        ino: Ino,
        owner: LockOwner,
        ltype: u32,
        start: u64,
        end: u64,
    ) -> Result<LockInfo> {
        let txn = self.engine.create_readonly_transaction();
        plock::getlk(&txn, ino, owner, ltype, start, end).await
    }

    async fn setlk(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: LockOwner,
        block: bool,
        ltype: u32,
        start: u64,
        end: u64,
        pid: u32,
    ) -> Result<()> {
        plock::check_range(start, end)?;
        let req = LockRequest::Plock {
            ltype,
            start,
            end,
            pid,
        };
        self.acquire(ctx, ino, owner, req, block).await
    }

    async fn posix_lock(
        &self,
        ctx: &Context,
        cmd: u32,
        ino: Ino,
        owner: LockOwner,
        ltype: u32,
        start: u64,
        end: u64,
        pid: u32,
    ) -> Result<LockInfo> {
        let requested = LockInfo {
            ltype,
            start,
            end,
            pid,
        };
        match cmd {
            LOCK_GET => self.getlk(ctx, ino, owner, ltype, start, end).await,
            LOCK_SET | LOCK_TRY => {
                self.setlk(ctx, ino, owner, cmd == LOCK_SET, ltype, start, end, pid)
                    .await?;
                Ok(requested)
            }
            LOCK_INT => {
                let found = self.waiters.interrupt(ino, owner);
                tracing::debug!(ino, ?owner, found, "lock: interrupt");
                Ok(LockInfo::unlocked())
            }
            other => make_error_msg(StatusCode::INVALID_ARG, format!("lock command {}", other)),
        }
    }
}
