#![allow(dead_code)] // not every test binary uses every fixture

//! Shared entity fixtures for integration tests.
//!
//! Three relation shapes are covered:
//! - `Customer.orders`: a standalone link table of customer -> order pairs
//! - `Team.players`: the reverse view of `Player.team` (a to-one)
//! - `Tag.posts`: the reverse view of `Post.tags` (a standalone to-many)

use relbox_core::{
    Entity, EntityInfo, IdCell, PendingRelation, Ref, RelatedEntity, RelationId, RelationInfo,
    Store, ToMany, ToOne,
};
use std::sync::Arc;

pub const CUSTOMER_ORDERS_REL: RelationId = RelationId::new(1);
pub const POST_TAGS_REL: RelationId = RelationId::new(2);

// ---- Customer / Order: standalone to-many ----

pub struct Customer {
    pub id: IdCell,
    pub name: String,
    pub orders: ToMany<Customer, Order>,
}

pub struct Order {
    pub id: IdCell,
    pub item: String,
}

static CUSTOMER_ORDERS: RelationInfo<Customer, Order> = RelationInfo::standalone(
    EntityInfo::new("Customer"),
    EntityInfo::new("Order"),
    CUSTOMER_ORDERS_REL,
);

impl Entity for Customer {
    const NAME: &'static str = "Customer";

    fn id(&self) -> &IdCell {
        &self.id
    }
}

impl RelatedEntity for Customer {
    fn attach_relations(this: &Ref<Self>, store: &Arc<Store>) {
        this.orders.attach(this, store);
    }

    fn pending_relations(&self) -> Vec<&dyn PendingRelation> {
        vec![&self.orders]
    }
}

impl Entity for Order {
    const NAME: &'static str = "Order";

    fn id(&self) -> &IdCell {
        &self.id
    }
}

impl RelatedEntity for Order {}

pub fn customer(name: &str) -> Ref<Customer> {
    Ref::new(Customer {
        id: IdCell::new(),
        name: name.to_owned(),
        orders: ToMany::new(&CUSTOMER_ORDERS),
    })
}

pub fn order(item: &str) -> Ref<Order> {
    Ref::new(Order {
        id: IdCell::new(),
        item: item.to_owned(),
    })
}

// ---- Team / Player: backlink over a to-one ----

pub struct Team {
    pub id: IdCell,
    pub name: String,
    pub players: ToMany<Team, Player>,
}

pub struct Player {
    pub id: IdCell,
    pub name: String,
    pub team: ToOne<Player, Team>,
}

fn player_team(player: &Player) -> &ToOne<Player, Team> {
    &player.team
}

static PLAYER_TEAM: RelationInfo<Player, Team> =
    RelationInfo::to_one(EntityInfo::new("Player"), EntityInfo::new("Team"));

static TEAM_PLAYERS: RelationInfo<Team, Player> = RelationInfo::backlink_to_one(
    EntityInfo::new("Team"),
    EntityInfo::new("Player"),
    player_team,
);

impl Entity for Team {
    const NAME: &'static str = "Team";

    fn id(&self) -> &IdCell {
        &self.id
    }
}

impl RelatedEntity for Team {
    fn attach_relations(this: &Ref<Self>, store: &Arc<Store>) {
        this.players.attach(this, store);
    }

    fn pending_relations(&self) -> Vec<&dyn PendingRelation> {
        vec![&self.players]
    }
}

impl Entity for Player {
    const NAME: &'static str = "Player";

    fn id(&self) -> &IdCell {
        &self.id
    }
}

impl RelatedEntity for Player {
    fn attach_relations(this: &Ref<Self>, store: &Arc<Store>) {
        this.team.attach(this, store);
    }

    fn pending_relations(&self) -> Vec<&dyn PendingRelation> {
        vec![&self.team]
    }
}

pub fn team(name: &str) -> Ref<Team> {
    Ref::new(Team {
        id: IdCell::new(),
        name: name.to_owned(),
        players: ToMany::new(&TEAM_PLAYERS),
    })
}

pub fn player(name: &str) -> Ref<Player> {
    Ref::new(Player {
        id: IdCell::new(),
        name: name.to_owned(),
        team: ToOne::new(&PLAYER_TEAM),
    })
}

// ---- Tag / Post: backlink over a standalone to-many ----

pub struct Tag {
    pub id: IdCell,
    pub label: String,
    pub posts: ToMany<Tag, Post>,
}

pub struct Post {
    pub id: IdCell,
    pub title: String,
    pub tags: ToMany<Post, Tag>,
}

fn post_tags(post: &Post) -> &ToMany<Post, Tag> {
    &post.tags
}

static POST_TAGS: RelationInfo<Post, Tag> = RelationInfo::standalone(
    EntityInfo::new("Post"),
    EntityInfo::new("Tag"),
    POST_TAGS_REL,
);

static TAG_POSTS: RelationInfo<Tag, Post> = RelationInfo::backlink_to_many(
    EntityInfo::new("Tag"),
    EntityInfo::new("Post"),
    POST_TAGS_REL,
    post_tags,
);

impl Entity for Tag {
    const NAME: &'static str = "Tag";

    fn id(&self) -> &IdCell {
        &self.id
    }
}

impl RelatedEntity for Tag {
    fn attach_relations(this: &Ref<Self>, store: &Arc<Store>) {
        this.posts.attach(this, store);
    }

    fn pending_relations(&self) -> Vec<&dyn PendingRelation> {
        vec![&self.posts]
    }
}

impl Entity for Post {
    const NAME: &'static str = "Post";

    fn id(&self) -> &IdCell {
        &self.id
    }
}

impl RelatedEntity for Post {
    fn attach_relations(this: &Ref<Self>, store: &Arc<Store>) {
        this.tags.attach(this, store);
    }

    fn pending_relations(&self) -> Vec<&dyn PendingRelation> {
        vec![&self.tags]
    }
}

pub fn tag(label: &str) -> Ref<Tag> {
    Ref::new(Tag {
        id: IdCell::new(),
        label: label.to_owned(),
        posts: ToMany::new(&TAG_POSTS),
    })
}

pub fn post(title: &str) -> Ref<Post> {
    Ref::new(Post {
        id: IdCell::new(),
        title: title.to_owned(),
        tags: ToMany::new(&POST_TAGS),
    })
}

/// A store with all fixture boxes registered.
pub fn store() -> Arc<Store> {
    let store = Store::new();
    store.register::<Customer>().unwrap();
    store.register::<Order>().unwrap();
    store.register::<Team>().unwrap();
    store.register::<Player>().unwrap();
    store.register::<Tag>().unwrap();
    store.register::<Post>().unwrap();
    store
}
